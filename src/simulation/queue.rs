//! Time-ordered event queue
//!
//! Events are bucketed by timestamp; each bucket keeps insertion order so
//! ties resolve to whichever event was generated first.

use super::event::Event;
use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::io::Write;

/// A totally ordered simulated timestamp
#[derive(Debug, Clone, Copy)]
pub struct Timestamp(pub f64);

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered multimap from timestamp to the events at that timestamp
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    buckets: BTreeMap<Timestamp, VecDeque<Event>>,
    len: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the bucket for its timestamp
    pub fn add(&mut self, event: Event) {
        self.buckets
            .entry(Timestamp(event.time))
            .or_default()
            .push_back(event);
        self.len += 1;
    }

    /// Remove the first event of the earliest timestamp
    pub fn remove_earliest(&mut self) -> Option<Event> {
        let mut entry = self.buckets.first_entry()?;
        let event = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if event.is_some() {
            self.len -= 1;
        }
        event
    }

    /// Timestamp of the next event without removing it
    pub fn peek_time(&self) -> Option<f64> {
        self.buckets.keys().next().map(|t| t.0)
    }

    /// Move every event of `other` into this queue
    pub fn merge(&mut self, other: EventQueue) {
        for (time, events) in other.buckets {
            self.len += events.len();
            self.buckets.entry(time).or_default().extend(events);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Independent deep copy preserving order
    pub fn snapshot(&self) -> EventQueue {
        self.clone()
    }

    /// Iterate over events in drain order
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    /// One line per event accepted by `filter`, in drain order
    pub fn serialize<F>(&self, filter: F) -> String
    where
        F: Fn(&Event) -> bool,
    {
        let mut out = String::new();
        for event in self.iter().filter(|e| filter(e)) {
            let _ = writeln!(out, "{}", event);
        }
        out
    }

    /// Write a header line followed by every non-ignored event
    pub fn write_log<W: Write>(&self, mut writer: W, header: &str) -> std::io::Result<()> {
        writeln!(writer, "{}", header)?;
        writer.write_all(self.serialize(|e| !e.ignore).as_bytes())?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::event::EventKind;

    fn event(time: f64, unit: usize) -> Event {
        Event::new(EventKind::Failure, time, unit)
    }

    #[test]
    fn test_drain_is_time_ordered() {
        let mut queue = EventQueue::new();
        let times = [5.0, 1.0, 3.5, 1.0, 9.25, 0.0, 3.5];
        for (i, &t) in times.iter().enumerate() {
            queue.add(event(t, i));
        }
        assert_eq!(queue.len(), times.len());

        let mut last = f64::NEG_INFINITY;
        let mut drained = 0;
        while let Some(e) = queue.remove_earliest() {
            assert!(e.time >= last);
            last = e.time;
            drained += 1;
        }
        assert_eq!(drained, times.len());
        assert!(queue.remove_earliest().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut queue = EventQueue::new();
        queue.add(event(2.0, 10));
        queue.add(event(1.0, 0));
        queue.add(event(2.0, 11));
        queue.add(event(2.0, 12));

        let order: Vec<_> = std::iter::from_fn(|| queue.remove_earliest())
            .map(|e| e.unit().unwrap())
            .collect();
        assert_eq!(order, vec![0, 10, 11, 12]);
    }

    #[test]
    fn test_merge_and_snapshot() {
        let mut a = EventQueue::new();
        a.add(event(1.0, 1));
        a.add(event(4.0, 4));
        let mut b = EventQueue::new();
        b.add(event(1.0, 2));
        b.add(event(3.0, 3));

        a.merge(b);
        let snapshot = a.snapshot();
        assert_eq!(a.remove_earliest().unwrap().unit(), Some(1));
        assert_eq!(a.len(), 3);
        assert_eq!(snapshot.len(), 4);

        let units: Vec<_> = snapshot.iter().map(|e| e.unit().unwrap()).collect();
        assert_eq!(units, vec![1, 2, 3, 4]);
        assert_eq!(a.peek_time(), Some(1.0));
    }

    #[test]
    fn test_log_skips_ignored_events() {
        let mut queue = EventQueue::new();
        queue.add(event(1.0, 1));
        queue.add(event(2.0, 2).ignored(true));
        queue.add(Event::new(EventKind::Recovered, 3.0, 1));

        let mut buf = Vec::new();
        queue.write_log(&mut buf, "Iteration number: 0").unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Iteration number: 0");
        assert!(lines[1].contains("Failure unit#1"));
        assert!(lines[2].contains("Recovered unit#1"));
    }
}
