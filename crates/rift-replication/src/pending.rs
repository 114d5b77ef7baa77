//! Pending-command bookkeeping on both ends of the wire.
//!
//! The client stamps each input with the next sequence number, applies it
//! locally, and keeps it *pending* until a snapshot reports it processed.
//! The authority tracks a per-client high-water mark so duplicated or
//! reordered batches apply at most once.

use std::collections::{HashMap, VecDeque};

use rift_protocol::{ClientId, CommandPayload, NetCommand, Tick};

/// Client-side buffer of commands the authority has not yet confirmed.
#[derive(Debug, Default)]
pub struct PendingCommands {
    next_sequence: u32,
    commands: VecDeque<NetCommand>,
}

impl PendingCommands {
    /// Creates an empty buffer; the first stamped sequence is 1.
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            commands: VecDeque::new(),
        }
    }

    /// Stamps `payload` with the next sequence number and `tick`, buffers
    /// it, and returns a copy for transmission.
    pub fn stamp(&mut self, tick: Tick, payload: CommandPayload) -> NetCommand {
        let command = NetCommand {
            sequence: self.next_sequence,
            tick,
            payload,
        };
        self.next_sequence += 1;
        self.commands.push_back(command.clone());
        command
    }

    /// Drops every buffered command with sequence ≤ `processed` — the
    /// authority has confirmed them.
    pub fn trim(&mut self, processed: u32) {
        while self
            .commands
            .front()
            .is_some_and(|c| c.sequence <= processed)
        {
            self.commands.pop_front();
        }
    }

    /// The still-unconfirmed commands in ascending sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &NetCommand> {
        self.commands.iter()
    }

    /// Number of unconfirmed commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// `true` if every stamped command has been confirmed.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Forgets all predicted state. Sequence numbering continues — numbers
    /// are never reused, even across scene switches.
    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

/// Authority-side per-client high-water marks.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_processed: HashMap<ClientId, u32>,
}

impl SequenceTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances `client`'s mark if `sequence` is fresh. Returns `true`
    /// when the command should be applied, `false` for duplicates and
    /// reordered stragglers.
    pub fn observe(&mut self, client: ClientId, sequence: u32) -> bool {
        let mark = self.last_processed.entry(client).or_insert(0);
        if sequence > *mark {
            *mark = sequence;
            true
        } else {
            false
        }
    }

    /// The highest sequence applied for `client` (0 if none yet).
    pub fn processed(&self, client: ClientId) -> u32 {
        self.last_processed.get(&client).copied().unwrap_or(0)
    }

    /// The full per-client map, as carried in snapshots.
    pub fn report(&self) -> Vec<(ClientId, u32)> {
        self.last_processed
            .iter()
            .map(|(client, seq)| (*client, *seq))
            .collect()
    }

    /// Drops a departed client's mark.
    pub fn forget(&mut self, client: ClientId) {
        self.last_processed.remove(&client);
    }

    /// Drops every mark; used on scene switches where commands restart.
    pub fn reset(&mut self) {
        self.last_processed.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(dx: f32) -> CommandPayload {
        CommandPayload::Move { dx, dy: 0.0 }
    }

    #[test]
    fn test_stamping_is_monotonic_from_one() {
        let mut pending = PendingCommands::new();
        let a = pending.stamp(10, mv(1.0));
        let b = pending.stamp(11, mv(2.0));
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(b.tick, 11);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_trim_drops_confirmed_prefix() {
        let mut pending = PendingCommands::new();
        for tick in 0..5 {
            pending.stamp(tick, mv(1.0));
        }
        pending.trim(3);
        let remaining: Vec<u32> = pending.iter().map(|c| c.sequence).collect();
        assert_eq!(remaining, vec![4, 5]);

        pending.trim(5);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut pending = PendingCommands::new();
        pending.stamp(0, mv(1.0));
        pending.trim(1);
        pending.trim(1);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_clear_preserves_sequence_numbering() {
        let mut pending = PendingCommands::new();
        pending.stamp(0, mv(1.0));
        pending.stamp(1, mv(2.0));
        pending.clear();
        assert!(pending.is_empty());
        // Sequence numbers are never reused.
        assert_eq!(pending.stamp(2, mv(3.0)).sequence, 3);
    }

    #[test]
    fn test_tracker_accepts_fresh_rejects_stale() {
        let mut tracker = SequenceTracker::new();
        let client = ClientId(1);

        assert!(tracker.observe(client, 1));
        assert!(tracker.observe(client, 2));
        // Duplicate delivery.
        assert!(!tracker.observe(client, 2));
        // Reordered straggler.
        assert!(!tracker.observe(client, 1));
        // Gaps are allowed: the mark jumps.
        assert!(tracker.observe(client, 7));
        assert!(!tracker.observe(client, 5));
        assert_eq!(tracker.processed(client), 7);
    }

    #[test]
    fn test_tracker_is_per_client() {
        let mut tracker = SequenceTracker::new();
        assert!(tracker.observe(ClientId(1), 5));
        assert!(tracker.observe(ClientId(2), 1));
        assert_eq!(tracker.processed(ClientId(1)), 5);
        assert_eq!(tracker.processed(ClientId(2)), 1);
        assert_eq!(tracker.processed(ClientId(3)), 0);

        tracker.forget(ClientId(1));
        assert_eq!(tracker.processed(ClientId(1)), 0);
    }

    #[test]
    fn test_report_round_trips_through_lookup() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(ClientId(1), 4);
        tracker.observe(ClientId(2), 9);
        let mut report = tracker.report();
        report.sort_by_key(|(client, _)| *client);
        assert_eq!(report, vec![(ClientId(1), 4), (ClientId(2), 9)]);
    }
}
