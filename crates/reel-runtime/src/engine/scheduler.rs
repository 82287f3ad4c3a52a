//! The render daemon: one frame callback at a time, driven by the host's frame clock.
//!
//! The engine never sleeps or spawns threads. It asks its [`FrameScheduler`] for a frame;
//! the host answers by calling [`Engine::tick`] on its next vsync (or whenever it likes).

use reel_graph::NodeKind;

use super::Engine;

/// Host hook for frame requests. A windowing host forwards these to its redraw request.
pub trait FrameScheduler {
    fn request_frame(&mut self);

    fn cancel_frame(&mut self);
}

/// Does nothing; the host polls [`Engine::frame_requested`] instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualScheduler;

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) {}

    fn cancel_frame(&mut self) {}
}

/// Per-frame callback. Receives the engine and the host's timestamp in milliseconds.
pub type FrameCallback = Box<dyn FnMut(&mut Engine, f64)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

#[derive(Default)]
pub(super) struct Daemon {
    pub scheduled: bool,
    /// New targets start in auto mode while set.
    pub auto: bool,
    next_id: u64,
    pre: Vec<(CallbackId, FrameCallback)>,
    post: Vec<(CallbackId, FrameCallback)>,
    removed: Vec<CallbackId>,
    /// Set by `stop` while callbacks are running.
    cleared: bool,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("scheduled", &self.scheduled)
            .field("auto", &self.auto)
            .field("pre", &self.pre.len())
            .field("post", &self.post.len())
            .finish()
    }
}

impl Daemon {
    fn next_id(&mut self) -> CallbackId {
        self.next_id += 1;
        CallbackId(self.next_id)
    }

    fn has_callbacks(&self) -> bool {
        !self.pre.is_empty() || !self.post.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Pre,
    Post,
}

impl Engine {
    /// Replaces the frame scheduler. A pending request is re-issued on the new one.
    pub fn set_scheduler(&mut self, mut scheduler: Box<dyn FrameScheduler>) {
        self.scheduler.cancel_frame();
        if self.daemon.scheduled {
            scheduler.request_frame();
        }
        self.scheduler = scheduler;
    }

    /// True while a frame is pending; the host should call [`Engine::tick`].
    pub fn frame_requested(&self) -> bool {
        self.daemon.scheduled
    }

    /// Puts every target in auto mode and starts the frame loop. Targets created later
    /// start in auto mode too.
    pub fn go(&mut self, pre: Option<FrameCallback>, post: Option<FrameCallback>) {
        if self.destroyed {
            return;
        }
        self.daemon.auto = true;
        if let Some(cb) = pre {
            self.add_pre_render(cb);
        }
        if let Some(cb) = post {
            self.add_post_render(cb);
        }
        for t in self.targets() {
            let _ = self.graph.set_auto(t, true);
        }
        self.graph.take_wake();
        self.start_daemon();
    }

    /// Stops the frame loop, drops every frame callback and takes all targets out of
    /// auto mode.
    pub fn stop(&mut self) {
        self.daemon.auto = false;
        self.daemon.pre.clear();
        self.daemon.post.clear();
        self.daemon.cleared = true;
        for t in self.targets() {
            let _ = self.graph.set_auto(t, false);
        }
        self.graph.take_wake();
        self.cancel_daemon();
    }

    pub fn add_pre_render(&mut self, cb: FrameCallback) -> CallbackId {
        let id = self.daemon.next_id();
        self.daemon.pre.push((id, cb));
        self.start_daemon();
        id
    }

    pub fn add_post_render(&mut self, cb: FrameCallback) -> CallbackId {
        let id = self.daemon.next_id();
        self.daemon.post.push((id, cb));
        self.start_daemon();
        id
    }

    /// Unregisters a pre- or post-render callback. Safe to call from inside a callback.
    pub fn remove_callback(&mut self, id: CallbackId) -> bool {
        let before = self.daemon.pre.len() + self.daemon.post.len();
        self.daemon.pre.retain(|(i, _)| *i != id);
        self.daemon.post.retain(|(i, _)| *i != id);
        if self.daemon.pre.len() + self.daemon.post.len() != before {
            return true;
        }
        // Possibly the callback currently running.
        self.daemon.removed.push(id);
        false
    }

    pub(super) fn start_daemon(&mut self) {
        if self.destroyed || self.daemon.scheduled || self.gpu.is_none() {
            return;
        }
        self.daemon.scheduled = true;
        self.scheduler.request_frame();
    }

    pub(super) fn cancel_daemon(&mut self) {
        if self.daemon.scheduled {
            self.daemon.scheduled = false;
            self.scheduler.cancel_frame();
        }
    }

    /// Restarts the daemon if an auto target became dirty.
    pub(super) fn sync_wake(&mut self) {
        if self.graph.take_wake() {
            self.start_daemon();
        }
    }

    /// One daemon frame. Returns whether another frame was requested.
    ///
    /// Runs pre-render callbacks, polls every source for new media, renders each dirty
    /// auto target, runs post-render callbacks, then dispatches queued node events.
    /// Render failures are logged; the loop keeps going.
    pub fn tick(&mut self, now: f64) -> bool {
        if self.destroyed || !self.daemon.scheduled {
            return false;
        }
        self.daemon.scheduled = false;
        self.graph.take_wake();

        self.run_callbacks(Phase::Pre, now);

        for id in self.sources() {
            self.poll_source(id);
        }
        for id in self.targets() {
            let due = self
                .graph
                .node(id)
                .is_some_and(|n| n.auto() && n.dirty());
            if !due {
                continue;
            }
            if let Err(e) = self.render_target_id(id) {
                tracing::error!(node = %id, error = %e, "target render failed");
            }
        }

        self.run_callbacks(Phase::Post, now);
        self.flush_events();

        let keep_alive = self.daemon.has_callbacks()
            || (self.config.keep_alive_with_sources && !self.graph.ids_of(NodeKind::Source).is_empty());
        if keep_alive || self.graph.take_wake() {
            self.start_daemon();
        }
        self.daemon.scheduled
    }

    fn run_callbacks(&mut self, phase: Phase, now: f64) {
        self.daemon.cleared = false;
        let mut running = match phase {
            Phase::Pre => std::mem::take(&mut self.daemon.pre),
            Phase::Post => std::mem::take(&mut self.daemon.post),
        };
        for (_, cb) in running.iter_mut() {
            cb(self, now);
            if self.destroyed {
                return;
            }
        }
        if std::mem::take(&mut self.daemon.cleared) {
            return;
        }
        let removed = std::mem::take(&mut self.daemon.removed);
        running.retain(|(id, _)| !removed.contains(id));
        let list = match phase {
            Phase::Pre => &mut self.daemon.pre,
            Phase::Post => &mut self.daemon.post,
        };
        // Callbacks registered during the run go after the existing ones.
        let added = std::mem::take(list);
        *list = running;
        list.extend(added);
    }
}
