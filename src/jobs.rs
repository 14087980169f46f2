use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use glam::Mat4;
use parking_lot::{Condvar, Mutex};

use crate::{
    error::Result,
    scene::{ComponentId, EntityDesc, EntityId},
};

/// A scene change produced off the render thread. Applied at the start of the
/// next frame.
#[derive(Debug)]
pub enum SceneCommand {
    Spawn(EntityDesc),
    Despawn(EntityId),
    SetTransform(EntityId, Mat4),
    SetCullDistance(EntityId, Option<f32>),
    MarkDirty(ComponentId),
    AddInstance(ComponentId, Mat4),
    ClearInstances(ComponentId),
}

/// Sending half handed to background jobs.
#[derive(Clone, Debug)]
pub struct CommandSink(Sender<SceneCommand>);

impl CommandSink {
    /// Returns `false` once the renderer is gone.
    pub fn send(&self, command: SceneCommand) -> bool {
        self.0.send(command).is_ok()
    }

    pub fn spawn(&self, desc: EntityDesc) -> bool {
        self.send(SceneCommand::Spawn(desc))
    }

    pub fn despawn(&self, entity: EntityId) -> bool {
        self.send(SceneCommand::Despawn(entity))
    }

    pub fn set_transform(&self, entity: EntityId, transform: Mat4) -> bool {
        self.send(SceneCommand::SetTransform(entity, transform))
    }

    pub fn add_instance(&self, component: ComponentId, world: Mat4) -> bool {
        self.send(SceneCommand::AddInstance(component, world))
    }
}

#[derive(Debug, Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count -= 1;

        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Worker pool for physics, audio and other background work. Jobs never touch
/// the scene directly; they queue [`SceneCommand`]s that the renderer drains.
pub struct JobQueue {
    pool: rayon::ThreadPool,
    sender: Sender<SceneCommand>,
    receiver: Receiver<SceneCommand>,
    outstanding: Arc<Outstanding>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("threads", &self.pool.current_num_threads())
            .field("queued", &self.receiver.len())
            .field("outstanding", &*self.outstanding.count.lock())
            .finish()
    }
}

impl JobQueue {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("render-job-{i}"))
            .build()?;
        let (sender, receiver) = unbounded();

        Ok(Self {
            pool,
            sender,
            receiver,
            outstanding: Default::default(),
        })
    }

    pub fn sink(&self) -> CommandSink {
        CommandSink(self.sender.clone())
    }

    pub fn spawn(&self, job: impl FnOnce(&CommandSink) + Send + 'static) {
        *self.outstanding.count.lock() += 1;

        let guard = OutstandingGuard(self.outstanding.clone());
        let sink = self.sink();

        self.pool.spawn(move || {
            let _guard = guard;
            job(&sink);
        });
    }

    /// Jobs still running or queued.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock()
    }

    /// Blocks until every spawned job has finished.
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock();

        while *count > 0 {
            self.outstanding.idle.wait(&mut count);
        }
    }

    /// Takes every command delivered so far, in arrival order.
    pub(crate) fn drain(&self) -> Vec<SceneCommand> {
        self.receiver.try_iter().collect()
    }
}
