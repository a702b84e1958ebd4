//! Resources created once and shared by many pipelines.
//!
//! The first factory that needs a resource takes its create lock, creates it and
//! publishes it with [`SharedResource::set_created`]. Factories that lose the
//! race wait on the lock and find the resource created when they get it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use super::backend::ResourceHandle;
use super::key::{CharacteristicKeySet, FactoryCharacteristicKey};
use crate::runtime::scheduler::{Condition, Task, TaskMutex};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a shared resource; also the order create locks are taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Resource({})", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    DescriptorSetLayout,
    UniformBuffer,
    Sampler,
}

/// What to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceDescriptor {
    pub fn new(
        kind: ResourceKind,
        name: impl Into<String>,
    ) -> Self {
        Self { kind, name: name.into() }
    }
}

#[derive(Debug)]
pub struct SharedResource {
    id: ResourceId,
    descriptor: ResourceDescriptor,
    create_lock: TaskMutex,
    created: AtomicBool,
    handle: OnceCell<ResourceHandle>,
    users: Mutex<CharacteristicKeySet>,
}

impl SharedResource {
    pub fn new(descriptor: ResourceDescriptor) -> Arc<Self> {
        Arc::new(Self {
            id: ResourceId(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            descriptor,
            create_lock: TaskMutex::new(),
            created: AtomicBool::new(false),
            handle: OnceCell::new(),
            users: Mutex::new(CharacteristicKeySet::new()),
        })
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    #[inline]
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    /// Whether the resource was published. Seeing `true` also makes the
    /// handle visible.
    #[inline]
    pub fn is_created(&self) -> bool {
        self.created.load(Ordering::Acquire)
    }

    /// The handle, once created.
    pub fn handle(&self) -> Option<ResourceHandle> {
        if !self.is_created() {
            return None;
        }
        self.handle.get().copied()
    }

    /// Publish the created resource.
    ///
    /// # Panics
    ///
    /// If the resource was published before.
    pub fn set_created(
        &self,
        handle: ResourceHandle,
    ) {
        if self.handle.set(handle).is_err() {
            panic!("{} ({}) created twice", self.id, self.descriptor.name);
        }
        self.created.store(true, Ordering::Release);
    }

    /// Try to take the create lock; see [`TaskMutex::lock`].
    #[inline]
    pub fn lock_create(
        &self,
        task: &Arc<Task>,
        condition: Condition,
    ) -> bool {
        self.create_lock.lock(task, condition)
    }

    #[inline]
    pub fn unlock_create(
        &self,
        task: &Task,
    ) {
        self.create_lock.unlock(task);
    }

    /// Release or stop waiting for the create lock; see [`TaskMutex::abandon`].
    #[inline]
    pub fn abandon_create(
        &self,
        task: &Task,
    ) {
        self.create_lock.abandon(task);
    }

    #[inline]
    pub fn holds_create_lock(
        &self,
        task: &Task,
    ) -> bool {
        self.create_lock.is_self_locked(task)
    }

    #[inline]
    pub fn is_create_locked(&self) -> bool {
        self.create_lock.is_locked()
    }

    /// Record that `key` uses this resource.
    pub fn add_user(
        &self,
        key: FactoryCharacteristicKey,
    ) {
        self.users.lock().insert(key);
    }

    pub fn users(&self) -> CharacteristicKeySet {
        self.users.lock().clone()
    }
}
