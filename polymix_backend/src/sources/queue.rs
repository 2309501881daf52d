//! Gapless back-to-back playback of streams on a single voice.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use polymix_core::constants::{DEFAULT_SAMPLE_RATE, QUEUE_CAPACITY, is_supported_channel_count};
use polymix_core::{Handle, MixResult, MixerError};

use super::{AudioSource, Instance, SourceInstance, SourceProperties};
use crate::engine::Mixer;

pub struct Queue {
    props: SourceProperties,
    handle: Arc<AtomicCell<Handle>>,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            props: SourceProperties::new(DEFAULT_SAMPLE_RATE as f32, 1),
            handle: Arc::new(AtomicCell::new(Handle::NULL)),
        }
    }

    /// Voice handle of the playing queue, null until played.
    pub fn handle(&self) -> Handle {
        self.handle.load()
    }

    /// Append `source` behind whatever is pending. The queue itself must be playing.
    pub fn play(&self, mixer: &Mixer, source: &dyn AudioSource) -> MixResult<()> {
        mixer.enqueue(self.handle(), source)
    }

    /// Sources waiting or playing.
    pub fn count(&self, mixer: &Mixer) -> usize {
        mixer.queue_snapshot(self.handle()).map_or(0, |(count, _)| count)
    }

    pub fn is_currently_playing(&self, mixer: &Mixer, source: &dyn AudioSource) -> bool {
        let id = source.properties().source_id();
        id != 0 && mixer.queue_snapshot(self.handle()).and_then(|(_, front)| front) == Some(id)
    }

    /// Rate and layout every queued source must share.
    pub fn set_params(&mut self, sample_rate: f32, channels: usize) {
        if is_supported_channel_count(channels) {
            self.props.base_sample_rate = sample_rate;
            self.props.channels = channels;
        }
    }

    pub fn set_params_from(&mut self, source: &dyn AudioSource) {
        let props = source.properties();
        self.set_params(props.base_sample_rate, props.channels);
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for Queue {
    fn properties(&self) -> &SourceProperties {
        &self.props
    }

    fn properties_mut(&mut self) -> &mut SourceProperties {
        &mut self.props
    }

    fn create_instance(&self) -> Instance {
        Instance::Queue(QueueInstance {
            handle: Arc::clone(&self.handle),
            pending: VecDeque::with_capacity(QUEUE_CAPACITY),
            retired: Vec::with_capacity(QUEUE_CAPACITY),
            finished: 0,
        })
    }

    fn attach(&self, handle: Handle) -> Option<Handle> {
        let previous = self.handle.swap(handle);
        (!previous.is_null()).then_some(previous)
    }
}

pub struct QueueInstance {
    handle: Arc<AtomicCell<Handle>>,
    /// Source id and live instance of every pending entry, front playing
    pending: VecDeque<(u32, Box<dyn SourceInstance>)>,
    /// Ended entries parked by `fill` until the control side takes them.
    retired: Vec<Box<dyn SourceInstance>>,
    finished: u32,
}

impl QueueInstance {
    pub(crate) fn push(&mut self, source_id: u32, instance: Box<dyn SourceInstance>) -> MixResult<()> {
        if self.pending.len() >= QUEUE_CAPACITY {
            return Err(MixerError::QueueFull);
        }
        self.pending.push_back((source_id, instance));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn front_source(&self) -> Option<u32> {
        self.pending.front().map(|(id, _)| *id)
    }

    /// Hand ended entries over for dropping off the render thread. Leaves the
    /// parking list's capacity in place.
    pub(crate) fn take_retired(&mut self) -> Vec<Box<dyn SourceInstance>> {
        self.retired.drain(..).collect()
    }

    pub(crate) fn detach(&self, handle: Handle) {
        let _ = self.handle.compare_exchange(handle, Handle::NULL);
    }
}

impl SourceInstance for QueueInstance {
    fn fill(&mut self, out: &mut [f32], frames: usize, stride: usize) -> usize {
        let mut written = 0;
        while written < frames {
            let Some((_, current)) = self.pending.front_mut() else {
                break;
            };
            let read = current.fill(&mut out[written..], frames - written, stride);
            written += read;
            if current.has_ended() {
                if let Some((_, done)) = self.pending.pop_front() {
                    self.retired.push(done);
                }
                self.finished += 1;
            } else if read == 0 {
                break;
            }
        }
        written
    }

    /// Something has played and nothing is left.
    fn has_ended(&self) -> bool {
        self.finished != 0 && self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Emits a constant for a fixed number of frames.
    struct Burst {
        value: f32,
        left: usize,
    }

    impl SourceInstance for Burst {
        fn fill(&mut self, out: &mut [f32], frames: usize, _stride: usize) -> usize {
            let n = frames.min(self.left);
            out[..n].fill(self.value);
            self.left -= n;
            n
        }

        fn has_ended(&self) -> bool {
            self.left == 0
        }
    }

    fn instance() -> QueueInstance {
        match Queue::new().create_instance() {
            Instance::Queue(q) => q,
            _ => panic!("queue must create a queue instance"),
        }
    }

    #[test]
    fn test_sources_play_back_to_back() {
        let mut q = instance();
        q.push(1, Box::new(Burst { value: 1.0, left: 3 })).expect("room");
        q.push(2, Box::new(Burst { value: 2.0, left: 3 })).expect("room");
        let mut out = [0.0; 4];
        assert_eq!(q.fill(&mut out, 4, 4), 4);
        assert_eq!(out, [1.0, 1.0, 1.0, 2.0]);
        assert_eq!(q.front_source(), Some(2));
        assert!(!q.has_ended());

        let mut out = [0.0; 4];
        assert_eq!(q.fill(&mut out, 4, 4), 2);
        assert!(q.has_ended());
    }

    #[test]
    fn test_empty_queue_has_not_ended_before_playing() {
        let mut q = instance();
        let mut out = [0.0; 4];
        assert_eq!(q.fill(&mut out, 4, 4), 0);
        assert!(!q.has_ended());
    }

    #[test]
    fn test_push_rejects_overflow() {
        let mut q = instance();
        for id in 0..QUEUE_CAPACITY as u32 {
            q.push(id, Box::new(Burst { value: 0.0, left: 1 })).expect("room");
        }
        assert_eq!(
            q.push(99, Box::new(Burst { value: 0.0, left: 1 })),
            Err(MixerError::QueueFull)
        );
        assert_eq!(q.len(), QUEUE_CAPACITY);
    }

    /// Counts its own drops.
    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl SourceInstance for Tracked {
        fn fill(&mut self, _out: &mut [f32], _frames: usize, _stride: usize) -> usize {
            0
        }

        fn has_ended(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_ended_entries_are_not_dropped_while_filling() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut q = instance();
        q.push(1, Box::new(Tracked(Arc::clone(&drops)))).expect("room");
        q.push(2, Box::new(Tracked(Arc::clone(&drops)))).expect("room");
        let mut out = [0.0; 4];
        assert_eq!(q.fill(&mut out, 4, 4), 0);
        assert!(q.has_ended());
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        let retired = q.take_retired();
        assert_eq!(retired.len(), 2);
        assert!(q.retired.capacity() >= QUEUE_CAPACITY);
        drop(retired);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(q.take_retired().is_empty());
    }
}
