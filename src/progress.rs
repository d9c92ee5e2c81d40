//! Progress reporting and cooperative cancellation.
//!
//! Progress travels as [`ProgressEvent`]s over a `std::sync::mpsc::Sender`.
//! Senders are cloneable and thread-safe, so documents optimized on several
//! rayon workers can share one channel; the receiving side (a printer thread
//! in the CLI) is the single consumer.
//!
//! Fractions for one container member are spread over the whole batch:
//!
//! ```text
//! (format_index + member_index / total_members) / total_formats
//! ```
//!
//! so a document with three formats moves through `0..1/3`, `1/3..2/3` and
//! `2/3..1` as each container is rewritten.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

/// One progress update: overall fraction in `[0, 1]` plus a human-readable label.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub fraction: f64,
    pub message: String,
}

/// Where a single container rewrite sits within its batch of formats.
///
/// `total_formats` is fixed for the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressContext {
    pub format_index: usize,
    pub total_formats: usize,
}

impl ProgressContext {
    /// Context for a standalone rewrite, reporting in `0..1`.
    pub fn single() -> Self {
        Self {
            format_index: 0,
            total_formats: 1,
        }
    }

    /// Fraction reported when starting member `member_index` of `total_members`.
    pub fn member_fraction(&self, member_index: usize, total_members: usize) -> f64 {
        let within = if total_members == 0 {
            0.0
        } else {
            member_index as f64 / total_members as f64
        };
        self.scaled(self.format_index as f64 + within)
    }

    /// Fraction reported once every member of this format has been written.
    pub fn completed_fraction(&self) -> f64 {
        self.scaled(self.format_index as f64 + 1.0)
    }

    fn scaled(&self, position: f64) -> f64 {
        (position / self.total_formats.max(1) as f64).clamp(0.0, 1.0)
    }
}

/// Send one event if anyone is listening.
///
/// A closed channel is not an error: the consumer may have gone away.
pub fn report(progress: Option<&Sender<ProgressEvent>>, fraction: f64, message: impl Into<String>) {
    if let Some(tx) = progress {
        tx.send(ProgressEvent {
            fraction,
            message: message.into(),
        })
        .ok();
    }
}

/// Cooperative cancellation signal, polled between container members.
///
/// Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn single_format_spans_zero_to_one() {
        let ctx = ProgressContext::single();
        assert_eq!(ctx.member_fraction(0, 4), 0.0);
        assert_eq!(ctx.member_fraction(2, 4), 0.5);
        assert_eq!(ctx.completed_fraction(), 1.0);
    }

    #[test]
    fn later_formats_are_offset() {
        let ctx = ProgressContext {
            format_index: 1,
            total_formats: 2,
        };
        assert_eq!(ctx.member_fraction(0, 10), 0.5);
        assert_eq!(ctx.member_fraction(5, 10), 0.75);
        assert_eq!(ctx.completed_fraction(), 1.0);
    }

    #[test]
    fn empty_container_reports_format_start() {
        let ctx = ProgressContext {
            format_index: 1,
            total_formats: 4,
        };
        assert_eq!(ctx.member_fraction(0, 0), 0.25);
    }

    #[test]
    fn member_fractions_never_exceed_completion() {
        let ctx = ProgressContext {
            format_index: 0,
            total_formats: 3,
        };
        let total = 17;
        let mut last = 0.0;
        for i in 0..total {
            let f = ctx.member_fraction(i, total);
            assert!(f >= last);
            last = f;
        }
        assert!(last < ctx.completed_fraction());
    }

    #[test]
    fn report_without_sink_is_a_no_op() {
        report(None, 0.5, "nobody listening");
    }

    #[test]
    fn report_to_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        report(Some(&tx), 0.5, "receiver gone");
    }

    #[test]
    fn report_sends_event() {
        let (tx, rx) = mpsc::channel();
        report(Some(&tx), 0.25, "Processing EPUB: a.jpg");
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent {
                fraction: 0.25,
                message: "Processing EPUB: a.jpg".into()
            }
        );
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }
}
