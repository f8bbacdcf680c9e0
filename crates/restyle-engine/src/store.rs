use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use restyle_contracts::results::{ItemResult, ItemStatus, SlotKey};
use restyle_contracts::summary::SlotTotals;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    ImageUploaded,
    Generating,
    ResultsShown,
}

/// Proof that the holder started the newest attempt on a slot. Completing
/// with a ticket that is no longer current is a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTicket {
    key: SlotKey,
    token: u64,
}

impl AttemptTicket {
    pub fn key(&self) -> &SlotKey {
        &self.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTicket {
    owner: Option<AttemptTicket>,
    token: u64,
}

impl EditTicket {
    pub fn owner(&self) -> Option<&SlotKey> {
        self.owner.as_ref().map(AttemptTicket::key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditTarget {
    pub identity: String,
    pub owner: Option<SlotKey>,
    pub result: ItemResult,
}

/// Handle returned when a batch replaces the batch map.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub run_id: u64,
    pub tickets: Vec<AttemptTicket>,
}

/// Point-in-time copy of everything the store holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSnapshot {
    pub phase: SessionPhase,
    pub batch: IndexMap<String, ItemResult>,
    pub scenes: IndexMap<String, ItemResult>,
    pub custom: Vec<ItemResult>,
    pub custom_prompt: Option<String>,
    pub edit: Option<EditTarget>,
    pub scenes_generating: bool,
    pub custom_generating: bool,
}

#[derive(Debug, Clone)]
struct Slot {
    result: ItemResult,
    token: u64,
}

#[derive(Debug)]
struct EditSlot {
    identity: String,
    owner: Option<SlotKey>,
    result: ItemResult,
    token: u64,
}

#[derive(Debug)]
struct StoreState {
    next_token: u64,
    phase: SessionPhase,
    active_batch: Option<u64>,
    batch: IndexMap<String, Slot>,
    scenes: IndexMap<String, Slot>,
    custom: Vec<Slot>,
    custom_prompt: Option<String>,
    edit: Option<EditSlot>,
    active_scenes: Option<u64>,
    active_custom: Option<u64>,
}

impl StoreState {
    fn issue(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn slot(&self, key: &SlotKey) -> Option<&Slot> {
        match key {
            SlotKey::Batch(category) => self.batch.get(category),
            SlotKey::Scene(title) => self.scenes.get(title),
            SlotKey::Custom(index) => self.custom.get(*index),
        }
    }

    fn slot_mut(&mut self, key: &SlotKey) -> Option<&mut Slot> {
        match key {
            SlotKey::Batch(category) => self.batch.get_mut(category),
            SlotKey::Scene(title) => self.scenes.get_mut(title),
            SlotKey::Custom(index) => self.custom.get_mut(*index),
        }
    }

    /// Starts a new attempt on `key`, creating the slot for map-backed
    /// schemes. Custom slots only exist inside the current list.
    fn begin(&mut self, key: &SlotKey, result: ItemResult) -> Option<AttemptTicket> {
        let token = self.issue();
        let slot = Slot { result, token };
        match key {
            SlotKey::Batch(category) => {
                self.batch.insert(category.clone(), slot);
            }
            SlotKey::Scene(title) => {
                self.scenes.insert(title.clone(), slot);
            }
            SlotKey::Custom(index) => {
                *self.custom.get_mut(*index)? = slot;
            }
        }
        Some(AttemptTicket {
            key: key.clone(),
            token,
        })
    }

    fn is_current(&self, ticket: &AttemptTicket) -> bool {
        self.slot(&ticket.key)
            .map(|slot| slot.token == ticket.token)
            .unwrap_or(false)
    }
}

/// Shared owner of every slot result in a session.
///
/// Clones are handles onto the same state. Each write replaces a whole
/// slot value under one lock, so readers never see a half-written result.
#[derive(Debug, Clone)]
pub struct StatusStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                next_token: 0,
                phase: SessionPhase::Idle,
                active_batch: None,
                batch: IndexMap::new(),
                scenes: IndexMap::new(),
                custom: Vec::new(),
                custom_prompt: None,
                edit: None,
                active_scenes: None,
                active_custom: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &SlotKey) -> Option<ItemResult> {
        self.lock().slot(key).map(|slot| slot.result.clone())
    }

    /// Unconditional write. It supersedes any attempt in flight on the
    /// slot. Returns `false` for a custom index outside the list.
    pub fn set(&self, key: &SlotKey, result: ItemResult) -> bool {
        self.lock().begin(key, result).is_some()
    }

    /// Marks every key `Pending` and hands out one ticket per accepted key,
    /// discarding whatever those keys held before.
    pub fn initialize_many(&self, keys: &[SlotKey]) -> Vec<AttemptTicket> {
        let mut state = self.lock();
        keys.iter()
            .filter_map(|key| state.begin(key, ItemResult::Pending))
            .collect()
    }

    /// Starts one attempt on an existing slot. `None` when the slot does
    /// not exist, which keeps regenerations from creating slots.
    pub fn begin_attempt(&self, key: &SlotKey) -> Option<AttemptTicket> {
        let mut state = self.lock();
        state.slot(key)?;
        state.begin(key, ItemResult::Pending)
    }

    pub fn is_current(&self, ticket: &AttemptTicket) -> bool {
        self.lock().is_current(ticket)
    }

    /// Publishes the outcome of an attempt if it is still the slot's newest.
    pub fn complete(&self, ticket: &AttemptTicket, result: ItemResult) -> bool {
        let mut state = self.lock();
        match state.slot_mut(&ticket.key) {
            Some(slot) if slot.token == ticket.token => {
                slot.result = result;
                true
            }
            _ => false,
        }
    }

    /// Replaces the batch map wholesale. Entries keep the iteration order
    /// given here and every entry gets a fresh ticket.
    pub fn replace_batch<I>(&self, entries: I) -> BatchRun
    where
        I: IntoIterator<Item = (String, ItemResult)>,
    {
        let mut state = self.lock();
        state.batch.clear();
        let tickets = entries
            .into_iter()
            .filter_map(|(category, result)| state.begin(&SlotKey::Batch(category), result))
            .collect();
        let run_id = state.issue();
        state.active_batch = Some(run_id);
        state.phase = SessionPhase::Generating;
        BatchRun { run_id, tickets }
    }

    /// Moves to `ResultsShown` unless a reset or a newer batch took over.
    pub fn finish_batch(&self, run_id: u64) -> bool {
        let mut state = self.lock();
        if state.active_batch != Some(run_id) {
            return false;
        }
        state.active_batch = None;
        state.phase = SessionPhase::ResultsShown;
        true
    }

    /// Replaces the custom list and the prompt it was generated from.
    pub fn replace_custom(&self, prompt: Option<String>, entries: Vec<ItemResult>) -> Vec<AttemptTicket> {
        let mut state = self.lock();
        let mut tickets = Vec::with_capacity(entries.len());
        let mut slots = Vec::with_capacity(entries.len());
        for (index, result) in entries.into_iter().enumerate() {
            let token = state.issue();
            slots.push(Slot { result, token });
            tickets.push(AttemptTicket {
                key: SlotKey::Custom(index),
                token,
            });
        }
        state.custom = slots;
        state.custom_prompt = prompt;
        tickets
    }

    pub fn custom_prompt(&self) -> Option<String> {
        self.lock().custom_prompt.clone()
    }

    /// Where an edited image came from: a scene title, then a
    /// `custom-<n>` caption, then a batch category.
    pub fn resolve_identity(&self, identity: &str) -> Option<SlotKey> {
        let state = self.lock();
        if state.scenes.contains_key(identity) {
            return Some(SlotKey::Scene(identity.to_string()));
        }
        if let Some(index) = identity
            .strip_prefix("custom-")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|index| *index < state.custom.len())
        {
            return Some(SlotKey::Custom(index));
        }
        if state.batch.contains_key(identity) {
            return Some(SlotKey::Batch(identity.to_string()));
        }
        None
    }

    /// Sets the edit target, and its owner when it has one, to `Pending`.
    pub fn begin_edit(&self, identity: &str, owner: Option<SlotKey>) -> EditTicket {
        let mut state = self.lock();
        let owner_ticket = owner
            .as_ref()
            .filter(|key| state.slot(key).is_some())
            .and_then(|key| state.begin(key, ItemResult::Pending));
        let token = state.issue();
        state.edit = Some(EditSlot {
            identity: identity.to_string(),
            owner: owner_ticket.as_ref().map(|ticket| ticket.key.clone()),
            result: ItemResult::Pending,
            token,
        });
        EditTicket {
            owner: owner_ticket,
            token,
        }
    }

    /// Writes an edit outcome to the edit target and its owner. Each half
    /// is applied only if its own attempt is still current. Returns whether
    /// the edit target took the result.
    pub fn complete_edit(&self, ticket: &EditTicket, result: ItemResult) -> bool {
        let mut state = self.lock();
        if let Some(owner) = &ticket.owner {
            if let Some(slot) = state.slot_mut(&owner.key) {
                if slot.token == owner.token {
                    slot.result = result.clone();
                }
            }
        }
        match state.edit.as_mut() {
            Some(edit) if edit.token == ticket.token => {
                edit.result = result;
                true
            }
            _ => false,
        }
    }

    pub fn edit_target(&self) -> Option<EditTarget> {
        self.lock().edit.as_ref().map(|edit| EditTarget {
            identity: edit.identity.clone(),
            owner: edit.owner.clone(),
            result: edit.result.clone(),
        })
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn set_phase(&self, phase: SessionPhase) {
        self.lock().phase = phase;
    }

    /// Flags the scene flow as generating for a new run, taking over from
    /// any run still in flight.
    pub fn begin_scenes_run(&self) -> u64 {
        let mut state = self.lock();
        let run_id = state.issue();
        state.active_scenes = Some(run_id);
        run_id
    }

    /// Clears the scene flag unless a newer run or a reset took over.
    pub fn finish_scenes_run(&self, run_id: u64) -> bool {
        let mut state = self.lock();
        if state.active_scenes != Some(run_id) {
            return false;
        }
        state.active_scenes = None;
        true
    }

    pub fn begin_custom_run(&self) -> u64 {
        let mut state = self.lock();
        let run_id = state.issue();
        state.active_custom = Some(run_id);
        run_id
    }

    pub fn finish_custom_run(&self, run_id: u64) -> bool {
        let mut state = self.lock();
        if state.active_custom != Some(run_id) {
            return false;
        }
        state.active_custom = None;
        true
    }

    /// Counts per scheme, in batch / scenes / custom order.
    pub fn totals(&self) -> (SlotTotals, SlotTotals, SlotTotals) {
        let state = self.lock();
        (
            tally(state.batch.values()),
            tally(state.scenes.values()),
            tally(state.custom.iter()),
        )
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.lock();
        StoreSnapshot {
            phase: state.phase,
            batch: results_of(&state.batch),
            scenes: results_of(&state.scenes),
            custom: state.custom.iter().map(|slot| slot.result.clone()).collect(),
            custom_prompt: state.custom_prompt.clone(),
            edit: state.edit.as_ref().map(|edit| EditTarget {
                identity: edit.identity.clone(),
                owner: edit.owner.clone(),
                result: edit.result.clone(),
            }),
            scenes_generating: state.active_scenes.is_some(),
            custom_generating: state.active_custom.is_some(),
        }
    }

    /// Drops every result and returns to `Idle`. Tokens keep counting up,
    /// so tickets issued before the reset can never match again.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.phase = SessionPhase::Idle;
        state.active_batch = None;
        state.batch.clear();
        state.scenes.clear();
        state.custom.clear();
        state.custom_prompt = None;
        state.edit = None;
        state.active_scenes = None;
        state.active_custom = None;
    }
}

fn results_of(map: &IndexMap<String, Slot>) -> IndexMap<String, ItemResult> {
    map.iter()
        .map(|(key, slot)| (key.clone(), slot.result.clone()))
        .collect()
}

fn tally<'a>(slots: impl Iterator<Item = &'a Slot>) -> SlotTotals {
    let mut totals = SlotTotals::default();
    for slot in slots {
        match slot.result.status() {
            ItemStatus::Done => totals.done += 1,
            ItemStatus::Error => totals.error += 1,
            ItemStatus::Pending => totals.pending += 1,
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use std::thread;

    use restyle_contracts::results::{ItemResult, SlotKey};

    use super::*;
    use crate::testing::image_for;

    fn batch(category: &str) -> SlotKey {
        SlotKey::Batch(category.to_string())
    }

    fn scene(title: &str) -> SlotKey {
        SlotKey::Scene(title.to_string())
    }

    #[test]
    fn replace_batch_keeps_caller_order_and_drops_old_keys() {
        let store = StatusStore::new();
        store.replace_batch([("Old".to_string(), ItemResult::Pending)]);
        let run = store.replace_batch(
            ["Chef", "Astronaut", "Pilot"]
                .into_iter()
                .map(|key| (key.to_string(), ItemResult::Pending)),
        );

        let snapshot = store.snapshot();
        let keys: Vec<&str> = snapshot.batch.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Chef", "Astronaut", "Pilot"]);
        assert_eq!(run.tickets.len(), 3);
        assert_eq!(snapshot.phase, SessionPhase::Generating);
        assert_eq!(store.get(&batch("Old")), None);
    }

    #[test]
    fn initialize_many_merges_scenes_and_resets_reused_keys() {
        let store = StatusStore::new();
        store.set(&scene("Beach"), ItemResult::done(image_for("beach")));
        store.set(&scene("Forest"), ItemResult::error("failed"));

        let tickets = store.initialize_many(&[scene("Beach"), scene("Desert")]);

        assert_eq!(tickets.len(), 2);
        assert_eq!(store.get(&scene("Beach")), Some(ItemResult::Pending));
        assert_eq!(store.get(&scene("Desert")), Some(ItemResult::Pending));
        assert_eq!(store.get(&scene("Forest")), Some(ItemResult::error("failed")));
    }

    #[test]
    fn writes_to_different_keys_are_independent() {
        let store = StatusStore::new();
        let run = store.replace_batch(
            ["A", "B"]
                .into_iter()
                .map(|key| (key.to_string(), ItemResult::Pending)),
        );

        assert!(store.complete(&run.tickets[0], ItemResult::error("boom")));
        assert_eq!(store.get(&batch("B")), Some(ItemResult::Pending));
        assert!(store.complete(&run.tickets[1], ItemResult::done(image_for("B"))));
        assert_eq!(store.get(&batch("A")), Some(ItemResult::error("boom")));
    }

    #[test]
    fn superseded_ticket_cannot_overwrite_newer_attempt() {
        let store = StatusStore::new();
        let run = store.replace_batch([("Chef".to_string(), ItemResult::Pending)]);
        let stale = run.tickets[0].clone();

        let fresh = store.begin_attempt(&batch("Chef")).unwrap();
        assert!(!store.is_current(&stale));
        assert!(store.complete(&fresh, ItemResult::done(image_for("new"))));
        assert!(!store.complete(&stale, ItemResult::error("late failure")));

        assert_eq!(
            store.get(&batch("Chef")),
            Some(ItemResult::done(image_for("new")))
        );
    }

    #[test]
    fn reset_orphans_in_flight_attempts() {
        let store = StatusStore::new();
        let run = store.replace_batch([("Chef".to_string(), ItemResult::Pending)]);
        let custom = store.replace_custom(Some("jazz".to_string()), vec![ItemResult::Pending]);

        store.reset();

        assert!(!store.complete(&run.tickets[0], ItemResult::done(image_for("x"))));
        assert!(!store.complete(&custom[0], ItemResult::done(image_for("y"))));
        assert!(!store.finish_batch(run.run_id));
        let snapshot = store.snapshot();
        assert!(snapshot.batch.is_empty());
        assert!(snapshot.custom.is_empty());
        assert_eq!(snapshot.custom_prompt, None);
        assert_eq!(snapshot.phase, SessionPhase::Idle);

        // A slot recreated after the reset does not accept the old ticket.
        store.replace_batch([("Chef".to_string(), ItemResult::Pending)]);
        assert!(!store.complete(&run.tickets[0], ItemResult::error("late")));
        assert_eq!(store.get(&batch("Chef")), Some(ItemResult::Pending));
    }

    #[test]
    fn finish_batch_ignores_replaced_runs() {
        let store = StatusStore::new();
        let first = store.replace_batch([("A".to_string(), ItemResult::Pending)]);
        let second = store.replace_batch([("B".to_string(), ItemResult::Pending)]);

        assert!(!store.finish_batch(first.run_id));
        assert_eq!(store.phase(), SessionPhase::Generating);
        assert!(store.finish_batch(second.run_id));
        assert_eq!(store.phase(), SessionPhase::ResultsShown);
    }

    #[test]
    fn custom_slots_are_fixed_length() {
        let store = StatusStore::new();
        let tickets = store.replace_custom(
            Some("jazz club".to_string()),
            vec![ItemResult::Pending, ItemResult::Pending],
        );

        assert_eq!(tickets.len(), 2);
        assert!(!store.set(&SlotKey::Custom(2), ItemResult::Pending));
        assert!(store.begin_attempt(&SlotKey::Custom(5)).is_none());
        assert_eq!(store.initialize_many(&[SlotKey::Custom(1), SlotKey::Custom(9)]).len(), 1);
        assert_eq!(store.custom_prompt().as_deref(), Some("jazz club"));
    }

    #[test]
    fn resolve_identity_prefers_scene_then_custom_then_batch() {
        let store = StatusStore::new();
        store.replace_batch(
            ["custom-0", "Chef"]
                .into_iter()
                .map(|key| (key.to_string(), ItemResult::Pending)),
        );
        store.replace_custom(None, vec![ItemResult::Pending]);
        store.set(&scene("Chef"), ItemResult::Pending);

        assert_eq!(store.resolve_identity("Chef"), Some(scene("Chef")));
        assert_eq!(store.resolve_identity("custom-0"), Some(SlotKey::Custom(0)));
        assert_eq!(store.resolve_identity("custom-3"), None);
        assert_eq!(store.resolve_identity("Pilot"), None);
    }

    #[test]
    fn edit_writes_owner_and_target() {
        let store = StatusStore::new();
        store.replace_batch([("Chef".to_string(), ItemResult::done(image_for("chef")))]);

        let ticket = store.begin_edit("Chef", Some(batch("Chef")));
        assert_eq!(ticket.owner(), Some(&batch("Chef")));
        assert_eq!(store.get(&batch("Chef")), Some(ItemResult::Pending));
        assert_eq!(
            store.edit_target().map(|edit| edit.result),
            Some(ItemResult::Pending)
        );

        assert!(store.complete_edit(&ticket, ItemResult::done(image_for("edited"))));
        assert_eq!(
            store.get(&batch("Chef")),
            Some(ItemResult::done(image_for("edited")))
        );
        let edit = store.edit_target().unwrap();
        assert_eq!(edit.identity, "Chef");
        assert_eq!(edit.result, ItemResult::done(image_for("edited")));
    }

    #[test]
    fn edit_without_owner_only_updates_target() {
        let store = StatusStore::new();
        let ticket = store.begin_edit("unknown", None);
        assert!(store.complete_edit(&ticket, ItemResult::error("nope")));
        let edit = store.edit_target().unwrap();
        assert_eq!(edit.owner, None);
        assert_eq!(edit.result, ItemResult::error("nope"));
    }

    #[test]
    fn totals_count_each_scheme() {
        let store = StatusStore::new();
        store.replace_batch([
            ("A".to_string(), ItemResult::done(image_for("a"))),
            ("B".to_string(), ItemResult::error("x")),
            ("C".to_string(), ItemResult::Pending),
        ]);
        store.set(&scene("S"), ItemResult::done(image_for("s")));

        let (batch, scenes, custom) = store.totals();
        assert_eq!((batch.done, batch.error, batch.pending), (1, 1, 1));
        assert_eq!(scenes.done, 1);
        assert_eq!(custom, SlotTotals::default());
    }

    #[test]
    fn clones_share_state_across_threads() -> anyhow::Result<()> {
        let store = StatusStore::new();
        let run = store.replace_batch([("A".to_string(), ItemResult::Pending)]);
        let worker = store.clone();
        let ticket = run.tickets[0].clone();

        thread::spawn(move || worker.complete(&ticket, ItemResult::done(image_for("a"))))
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))?;

        assert_eq!(store.get(&batch("A")), Some(ItemResult::done(image_for("a"))));
        Ok(())
    }

    #[test]
    fn superseded_run_leaves_generating_flag_to_newer_run() {
        let store = StatusStore::new();
        let first = store.begin_custom_run();
        let second = store.begin_custom_run();

        assert!(!store.finish_custom_run(first));
        assert!(store.snapshot().custom_generating);
        assert!(store.finish_custom_run(second));
        assert!(!store.snapshot().custom_generating);

        let scenes = store.begin_scenes_run();
        store.reset();
        assert!(!store.finish_scenes_run(scenes));
        assert!(!store.snapshot().scenes_generating);
    }
}
