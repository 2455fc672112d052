use crate::device::{DeviceFunctions, GpuObject};
use std::sync::Arc;
use tracing::trace;

/// A group of device objects that are destroyed together.
///
/// Objects are destroyed in reverse order of [`push`](Self::push), so a
/// creation sequence that bails out half way with `?` releases exactly what
/// it created so far.
pub struct OwnedObjects {
    device: Arc<dyn DeviceFunctions>,
    label: &'static str,
    objects: Vec<GpuObject>,
}

impl OwnedObjects {
    pub fn new(device: Arc<dyn DeviceFunctions>, label: &'static str) -> Self {
        Self {
            device,
            label,
            objects: Vec::new(),
        }
    }

    pub fn push(&mut self, object: GpuObject) {
        self.objects.push(object);
    }

    pub fn device(&self) -> &Arc<dyn DeviceFunctions> {
        &self.device
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Destroys everything held so far. Calling it twice is a no-op.
    pub fn release(&mut self) {
        if self.objects.is_empty() {
            return;
        }
        trace!(label = self.label, count = self.objects.len(), "releasing device objects");
        while let Some(object) = self.objects.pop() {
            self.device.destroy(object);
        }
    }
}

impl Drop for OwnedObjects {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for OwnedObjects {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedObjects")
            .field("label", &self.label)
            .field("objects", &self.objects)
            .finish()
    }
}
