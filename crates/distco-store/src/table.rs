//! Table descriptors and the chunked fragment storage (spec §3 "Table").

use distco_types::{Gci, LcpId, LcpSlot, NodeId, TableId, MAX_CRASHED_REPLICAS, MAX_LCP_STORED};
use serde::{Deserialize, Serialize};

use crate::fragment::Fragment;
use crate::replica::{CrashInterval, LcpEntry, LcpStatus, ReplicaRecord};
use crate::{Error, Result};

/// Word size of one on-disk table-file page (spec §6).
pub const PAGE_WORDS: usize = 2048;

/// Fixed header words at the front of page 0: `totalFragments, noOfBackups,
/// hashPointer, kvalue, mask, method, storedFlag`, padding, then the page
/// count and total word count at words 33 and 34.
const HEADER_WORDS: usize = 35;
const PAGE_COUNT_WORD: usize = 33;
const TOTAL_WORDS_WORD: usize = 34;

fn push_gci_or_infinity(words: &mut Vec<u32>, gci: Option<Gci>) {
    words.push(gci.map_or(u32::MAX, Gci::get));
}

fn replica_words(replica: &ReplicaRecord) -> Vec<u32> {
    let mut words = Vec::with_capacity(4 + MAX_LCP_STORED * 4 + MAX_CRASHED_REPLICAS * 2);
    words.push(replica.node.get());
    words.push(replica.initial_gci.get());
    words.push(replica.no_crashed_replicas() as u32);
    words.push(replica.next_lcp.get() as u32);
    for entry in &replica.lcp_history {
        words.push(entry.max_gci_completed.get());
        words.push(entry.max_gci_started.get());
        words.push(entry.lcp_id.get());
        words.push(match entry.status {
            LcpStatus::Valid => 1,
            LcpStatus::Invalid => 0,
        });
    }
    let intervals = replica.crash_intervals();
    for slot in 0..MAX_CRASHED_REPLICAS {
        match intervals.get(slot) {
            Some(interval) => {
                words.push(interval.create_gci.get());
                push_gci_or_infinity(&mut words, interval.last_gci);
            }
            None => {
                words.push(0);
                words.push(0);
            }
        }
    }
    words
}

fn take_word(words: &[u32], idx: &mut usize) -> Result<u32> {
    let v = *words
        .get(*idx)
        .ok_or_else(|| Error::CorruptTableFile("truncated table file".into()))?;
    *idx += 1;
    Ok(v)
}

fn replica_from_words(words: &[u32], idx: &mut usize) -> Result<ReplicaRecord> {
    let node = NodeId::new(take_word(words, idx)?);
    let initial_gci = Gci::new(take_word(words, idx)?);
    let no_crashed_replicas = take_word(words, idx)? as usize;
    let next_lcp = LcpSlot::new(take_word(words, idx)? as u8);

    let mut lcp_history = [LcpEntry::default(); MAX_LCP_STORED];
    for entry in &mut lcp_history {
        let max_gci_completed = Gci::new(take_word(words, idx)?);
        let max_gci_started = Gci::new(take_word(words, idx)?);
        let lcp_id = LcpId::new(take_word(words, idx)?);
        let status = if take_word(words, idx)? == 1 {
            LcpStatus::Valid
        } else {
            LcpStatus::Invalid
        };
        *entry = LcpEntry {
            lcp_id,
            status,
            max_gci_started,
            max_gci_completed,
        };
    }

    let mut crash_intervals = Vec::with_capacity(no_crashed_replicas.min(MAX_CRASHED_REPLICAS));
    for slot in 0..MAX_CRASHED_REPLICAS {
        let create_gci = take_word(words, idx)?;
        let last_gci_word = take_word(words, idx)?;
        if slot < no_crashed_replicas {
            let last_gci = (last_gci_word != u32::MAX).then(|| Gci::new(last_gci_word));
            crash_intervals.push(CrashInterval {
                create_gci: Gci::new(create_gci),
                last_gci,
            });
        }
    }

    Ok(ReplicaRecord::from_raw_parts(
        node,
        initial_gci,
        next_lcp,
        lcp_history,
        crash_intervals,
    ))
}

fn fragment_words(frag_id: u32, fragment: &Fragment) -> Vec<u32> {
    let mut words = vec![
        frag_id,
        fragment.preferred_primary.get(),
        fragment.no_stored_replicas() as u32,
        fragment.no_old_stored_replicas() as u32,
        u32::from(fragment.distribution_key),
    ];
    for replica in fragment.stored.iter().chain(fragment.old_stored.iter()) {
        words.extend(replica_words(replica));
    }
    words
}

fn fragment_from_words(words: &[u32], idx: &mut usize) -> Result<Fragment> {
    let _frag_id = take_word(words, idx)?;
    let preferred_primary = NodeId::new(take_word(words, idx)?);
    let no_stored_replicas = take_word(words, idx)? as usize;
    let no_old_stored_replicas = take_word(words, idx)? as usize;
    let distribution_key = take_word(words, idx)? as u8;

    let mut stored = Vec::with_capacity(no_stored_replicas);
    for _ in 0..no_stored_replicas {
        stored.push(replica_from_words(words, idx)?);
    }
    let mut old_stored = Vec::with_capacity(no_old_stored_replicas);
    for _ in 0..no_old_stored_replicas {
        old_stored.push(replica_from_words(words, idx)?);
    }

    let active_nodes = stored.iter().map(|r| r.node).collect();
    Ok(Fragment {
        preferred_primary,
        active_nodes,
        stored,
        old_stored,
        distribution_key,
        no_lcp_replicas: 0,
        log_part_id: 0,
    })
}

/// Lifecycle status of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableStatus {
    Idle,
    Active,
    Creating,
    Dropping,
}

/// LCP status of a table, driven by fragment-checkpoint completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableLcpStatus {
    Active,
    WritingToFile,
    Completed,
}

/// Table-descriptor copy status — which of the two on-disk file copies is
/// being (re)written, gating the pack/unpack state machine (spec SPEC_FULL §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyStatus {
    Idle,
    ReadingGcp,
    ReadingTabfile,
    WritingFragUpdate,
    ReadingFragUpdate,
}

/// Which half of the table-descriptor update cycle is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateState {
    Idle,
    UpdatingFragStart,
    UpdatingFragComplete,
}

/// A table: schema, status, and its fragments.
///
/// Fragments are stored contiguously (`Vec<Fragment>`, index = fragment id)
/// rather than as a linked chunk list, per the arena-indexed-records design
/// note — functionally equivalent to the original's chunk-based storage but
/// without raw pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub schema_version: u32,
    pub status: TableStatus,
    pub lcp_status: TableLcpStatus,
    pub copy_status: CopyStatus,
    pub update_state: UpdateState,
    pub fragments: Vec<Fragment>,
    /// Target replica count minus one, as carried in the table file header.
    pub no_of_backups: u32,
    /// Distribution-hash-map parameters carried in the table file header;
    /// the distribution coordinator persists these but does not compute
    /// hash values itself.
    pub hash_pointer: u32,
    pub kvalue: u32,
    pub mask: u32,
    pub stored_flag: bool,
}

impl Table {
    pub fn new(id: TableId, schema_version: u32, fragments: Vec<Fragment>) -> Self {
        Self {
            id,
            schema_version,
            status: TableStatus::Creating,
            lcp_status: TableLcpStatus::Completed,
            copy_status: CopyStatus::Idle,
            update_state: UpdateState::Idle,
            fragments,
            no_of_backups: 0,
            hash_pointer: 0,
            kvalue: 0,
            mask: 0,
            stored_flag: true,
        }
    }

    pub fn total_fragments(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragment(&self, idx: u32) -> Option<&Fragment> {
        self.fragments.get(idx as usize)
    }

    pub fn fragment_mut(&mut self, idx: u32) -> Option<&mut Fragment> {
        self.fragments.get_mut(idx as usize)
    }

    /// Marks the table active once every `ADD_FRAGREQ` has been confirmed.
    pub fn mark_active(&mut self) {
        self.status = TableStatus::Active;
    }

    pub fn mark_dropping(&mut self) {
        self.status = TableStatus::Dropping;
    }

    /// Packs the table into the on-disk page format (spec §6): a fixed
    /// header followed by one record per fragment, each followed by its
    /// replicas' records. Page boundaries (2048 words) are bookkeeping only
    /// here — the flat word stream is what `from_words` needs back;
    /// `page_count`/`total_words` (header words 33/34) are what a reader
    /// uses to size its page buffers before decoding.
    pub fn to_words(&self) -> Vec<u32> {
        let mut body = Vec::new();
        for (frag_id, fragment) in self.fragments.iter().enumerate() {
            body.extend(fragment_words(frag_id as u32, fragment));
        }
        let total_words = HEADER_WORDS + body.len();
        let page_count = total_words.div_ceil(PAGE_WORDS);

        let mut words = vec![0u32; HEADER_WORDS];
        words[0] = self.fragments.len() as u32;
        words[1] = self.no_of_backups;
        words[2] = self.hash_pointer;
        words[3] = self.kvalue;
        words[4] = self.mask;
        words[5] = 0; // method: HASH is the only supported distribution method
        words[6] = u32::from(self.stored_flag);
        words[PAGE_COUNT_WORD] = page_count as u32;
        words[TOTAL_WORDS_WORD] = total_words as u32;
        words.extend(body);
        words
    }

    /// Inverse of [`to_words`](Self::to_words). `id`/`schema_version` come
    /// from the caller (the table file's own name and dictionary entry
    /// carry those, not the page body) and lifecycle/copy status fields
    /// come back at their restart defaults, same as [`Table::new`].
    pub fn from_words(id: TableId, schema_version: u32, words: &[u32]) -> Result<Self> {
        if words.len() < HEADER_WORDS {
            return Err(Error::CorruptTableFile("truncated table file header".into()));
        }
        let total_fragments = words[0] as usize;
        let no_of_backups = words[1];
        let hash_pointer = words[2];
        let kvalue = words[3];
        let mask = words[4];
        let stored_flag = words[6] != 0;
        let total_words = words[TOTAL_WORDS_WORD] as usize;
        if total_words > words.len() || total_words < HEADER_WORDS {
            return Err(Error::CorruptTableFile("bad total word count".into()));
        }

        let body = &words[HEADER_WORDS..total_words];
        let mut idx = 0usize;
        let mut fragments = Vec::with_capacity(total_fragments);
        for _ in 0..total_fragments {
            fragments.push(fragment_from_words(body, &mut idx)?);
        }

        let mut table = Table::new(id, schema_version, fragments);
        table.no_of_backups = no_of_backups;
        table.hash_pointer = hash_pointer;
        table.kvalue = kvalue;
        table.mask = mask;
        table.stored_flag = stored_flag;
        Ok(table)
    }
}

/// The table/fragment/replica store — L2 of the component table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableStore {
    tables: std::collections::BTreeMap<u32, Table>,
}

impl TableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Table) {
        self.tables.insert(table.id.get(), table);
    }

    pub fn get(&self, id: TableId) -> Option<&Table> {
        self.tables.get(&id.get())
    }

    pub fn get_mut(&mut self, id: TableId) -> Option<&mut Table> {
        self.tables.get_mut(&id.get())
    }

    pub fn remove(&mut self, id: TableId) -> Option<Table> {
        self.tables.remove(&id.get())
    }

    /// Tables in ascending id order — the order the LCP walk visits them in
    /// (spec §4.4 "Fragment ordering").
    pub fn ids_in_order(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables.keys().copied().map(TableId::new)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::ReplicaRecord;
    use distco_types::{FragmentId, Gci, NodeId};

    #[test]
    fn table_store_iterates_in_ascending_id_order() {
        let mut store = TableStore::new();
        store.insert(Table::new(TableId::new(5), 1, vec![]));
        store.insert(Table::new(TableId::new(1), 1, vec![]));
        store.insert(Table::new(TableId::new(3), 1, vec![]));
        let ids: Vec<_> = store.ids_in_order().map(TableId::get).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn fragment_lookup_roundtrips() {
        let frag = Fragment::new(
            NodeId::new(1),
            0,
            vec![ReplicaRecord::new(NodeId::new(1), Gci::ZERO)],
        );
        let mut table = Table::new(TableId::new(1), 1, vec![frag]);
        assert!(table.fragment(0).is_some());
        table.fragment_mut(0).unwrap().distribution_key = 7;
        assert_eq!(table.fragment(0).unwrap().distribution_key, 7);
        let _ = FragmentId::new(0);
    }

    fn sample_table() -> Table {
        let mut r1 = ReplicaRecord::new(NodeId::new(1), Gci::ZERO);
        r1.record_lcp_completion(distco_types::LcpId::new(1), Gci::new(5), Gci::new(5));
        r1.record_crash(Gci::new(10)).unwrap();
        r1.record_restart(Gci::new(11)).unwrap();

        let r2 = ReplicaRecord::new(NodeId::new(2), Gci::ZERO);

        let mut frag0 = Fragment::new(NodeId::new(1), 0, vec![r1, r2]);
        frag0.begin_takeover(NodeId::new(3), Gci::new(12));

        let frag1 = Fragment::new(NodeId::new(2), 1, vec![ReplicaRecord::new(NodeId::new(2), Gci::ZERO)]);

        let mut table = Table::new(TableId::new(7), 3, vec![frag0, frag1]);
        table.no_of_backups = 1;
        table.hash_pointer = 42;
        table.kvalue = 6;
        table.mask = 0xff;
        table.stored_flag = true;
        table
    }

    /// `active_nodes` fan-out order has no field in the page format (spec
    /// §6 only persists `preferredPrimary` plus the stored/old-stored
    /// records) — a node mid-takeover is reconstructed on restart from
    /// `stored` order alone, so it is not compared when an old-stored
    /// replica is in flight.
    fn assert_fragments_equal(a: &Fragment, b: &Fragment) {
        assert_eq!(a.preferred_primary, b.preferred_primary);
        if a.old_stored.is_empty() {
            assert_eq!(a.active_nodes, b.active_nodes);
        }
        assert_eq!(a.distribution_key, b.distribution_key);
        assert_eq!(a.stored.len(), b.stored.len());
        assert_eq!(a.old_stored.len(), b.old_stored.len());
        for (ra, rb) in a.stored.iter().chain(a.old_stored.iter()).zip(b.stored.iter().chain(b.old_stored.iter())) {
            assert_eq!(ra.node, rb.node);
            assert_eq!(ra.initial_gci, rb.initial_gci);
            assert_eq!(ra.crash_intervals(), rb.crash_intervals());
            assert_eq!(ra.lcp_history, rb.lcp_history);
            assert_eq!(ra.next_lcp, rb.next_lcp);
        }
    }

    #[test]
    fn page_word_roundtrip_preserves_fragments_and_replicas() {
        let table = sample_table();
        let words = table.to_words();
        let back = Table::from_words(table.id, table.schema_version, &words).unwrap();

        assert_eq!(back.no_of_backups, table.no_of_backups);
        assert_eq!(back.hash_pointer, table.hash_pointer);
        assert_eq!(back.kvalue, table.kvalue);
        assert_eq!(back.mask, table.mask);
        assert_eq!(back.stored_flag, table.stored_flag);
        assert_eq!(back.fragments.len(), table.fragments.len());
        for (a, b) in table.fragments.iter().zip(back.fragments.iter()) {
            assert_fragments_equal(a, b);
        }
    }

    #[test]
    fn header_records_page_count_and_total_word_count() {
        let table = sample_table();
        let words = table.to_words();
        assert_eq!(words[TOTAL_WORDS_WORD] as usize, words.len());
        let expected_pages = (words.len()).div_ceil(PAGE_WORDS);
        assert_eq!(words[PAGE_COUNT_WORD] as usize, expected_pages);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let table = sample_table();
        let words = table.to_words();
        let truncated = &words[..words.len() - 1];
        assert!(Table::from_words(table.id, table.schema_version, truncated).is_err());
    }
}
