//! Property tests for the per-subscriber drop-oldest queue.

use bytes::Bytes;
use gameview::hub::{FrameQueue, PushOutcome};
use gameview::types::Frame;
use proptest::prelude::*;

fn frame(sequence: u64) -> Frame {
    Frame {
        sequence,
        timestamp_us: sequence,
        captured_at: chrono::Utc::now(),
        data: Bytes::from(sequence.to_le_bytes().to_vec()),
    }
}

proptest! {
    /// Whatever the backlog, the queue holds the newest `capacity` frames in
    /// production order and counts everything it discarded.
    #[test]
    fn prop_keeps_newest_frames_in_order(capacity in 1usize..16, count in 0u64..200) {
        let queue = FrameQueue::new(capacity);
        for i in 1..=count {
            let outcome = queue.push_drop_oldest(frame(i));
            prop_assert_ne!(outcome, PushOutcome::Closed);
        }

        let kept = count.min(capacity as u64);
        prop_assert_eq!(queue.len() as u64, kept);
        prop_assert_eq!(queue.dropped(), count - kept);

        let drained: Vec<u64> = std::iter::from_fn(|| queue.try_pop())
            .map(|f| f.sequence)
            .collect();
        let expected: Vec<u64> = (count - kept + 1..=count).collect();
        prop_assert_eq!(drained, expected);
    }

    /// Interleaved pushes and pops never reorder or duplicate frames.
    #[test]
    fn prop_interleaved_consumer_sees_increasing_sequences(
        capacity in 1usize..8,
        ops in proptest::collection::vec(any::<bool>(), 1..300),
    ) {
        let queue = FrameQueue::new(capacity);
        let mut next = 1u64;
        let mut last_seen = 0u64;
        let mut received = 0u64;

        for push in ops {
            if push {
                queue.push_drop_oldest(frame(next));
                next += 1;
            } else if let Some(f) = queue.try_pop() {
                prop_assert!(f.sequence > last_seen);
                last_seen = f.sequence;
                received += 1;
            }
        }
        while let Some(f) = queue.try_pop() {
            prop_assert!(f.sequence > last_seen);
            last_seen = f.sequence;
            received += 1;
        }

        prop_assert_eq!(received + queue.dropped(), next - 1);
    }

    /// A consumer that keeps pace never loses a frame.
    #[test]
    fn prop_no_loss_when_keeping_pace(capacity in 1usize..8, count in 1u64..100) {
        let queue = FrameQueue::new(capacity);
        for i in 1..=count {
            queue.push_drop_oldest(frame(i));
            let got = queue.try_pop().map(|f| f.sequence);
            prop_assert_eq!(got, Some(i));
        }
        prop_assert_eq!(queue.dropped(), 0);
    }
}

#[test]
fn test_closed_queue_refuses_frames() {
    let queue = FrameQueue::new(2);
    queue.close();
    assert_eq!(queue.push_drop_oldest(frame(1)), PushOutcome::Closed);
    assert!(queue.is_empty());
}
