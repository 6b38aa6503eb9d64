//! Chunk write coordinator (component C6).
//!
//! `ChunkWriter` is the per-chunk entry point: the upper I/O layer feeds it
//! buffered [`WriteCacheBlock`]s, it groups them into stripe-aligned
//! [`Operation`]s, derives parity and repair-read data, dispatches writes to
//! the right [`crate::executor::WriteExecutor`], and reconciles completions.
//! It owns no background thread: every bit of I/O happens inside
//! [`ChunkWriter::process_operations`].

use crate::chunk_type::ChunkType;
use crate::connector::{ChainHandle, ChunkConnector};
use crate::error::{Error, ExecutorError, Result};
use crate::executor::{ExecutorState, StatusOutcome, WriteExecutor};
use crate::journal::{Journal, JournalPosition};
use crate::locator::{ChunkLayout, Locator};
use crate::log_info;
use crate::write_cache_block::WriteCacheBlock;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Identifies one [`Operation`] for the lifetime of a [`ChunkWriter`].
pub type OperationId = u64;

/// One stripe-aligned batch of writes tracked by the coordinator.
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    stripe_index: u64,
    parts: BTreeMap<ChunkType, JournalPosition>,
    /// Parity computed at dispatch time, retained for introspection/tests;
    /// not needed for correctness once enqueued (the wire frame already
    /// owns a copy of the bytes).
    parity: Option<Vec<u8>>,
    unfinished_writes: u32,
    offset_of_end: u64,
}

impl Operation {
    /// Identifier assigned when this operation was dispatched.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Chunk-relative byte offset immediately after this operation's last
    /// byte, used for collision ordering.
    pub fn offset_of_end(&self) -> u64 {
        self.offset_of_end
    }

    /// Parity payload computed for this operation, if it was an XOR
    /// dispatch.
    pub fn parity(&self) -> Option<&[u8]> {
        self.parity.as_deref()
    }
}

/// Lifecycle state of the coordinator (§4.6 of the governing design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Constructed, not yet `init`-ed.
    Uninitialized,
    /// `init` is in progress.
    Initializing,
    /// Accepting `addOperation` and dispatching full operations.
    Accepting,
    /// `startFlushMode` was called: partial stripes are now eligible.
    Flushing,
    /// `dropNewOperations` was called: buffered-not-yet-started work is discarded.
    Dropping,
    /// All pending operations resolved; executors are being shut down.
    Draining,
    /// `finish` completed successfully.
    Finished,
    /// A fatal failure or explicit `abortOperations` occurred.
    Aborted,
}

/// Per-chunk write coordinator.
pub struct ChunkWriter<L: Locator, C: ChunkConnector> {
    state: WriterState,
    locator: Option<L>,
    connector: Option<C>,
    chunk_id: u64,
    version: u32,
    layout: ChunkLayout,
    block_size: u64,
    journal: Journal,
    new_operations: Vec<Operation>,
    pending_operations: HashMap<OperationId, Operation>,
    write_id_to_operation: HashMap<u32, OperationId>,
    executors: BTreeMap<ChunkType, WriteExecutor>,
    next_operation_id: OperationId,
    next_write_id: HashMap<ChunkType, u32>,
}

impl<L: Locator, C: ChunkConnector> ChunkWriter<L, C> {
    /// Constructs an uninitialized coordinator. Call [`Self::init`] before
    /// anything else.
    pub fn new(block_size: u64) -> Self {
        ChunkWriter {
            state: WriterState::Uninitialized,
            locator: None,
            connector: None,
            chunk_id: 0,
            version: 0,
            layout: ChunkLayout::Standard,
            block_size,
            journal: Journal::new(),
            new_operations: Vec::new(),
            pending_operations: HashMap::new(),
            write_id_to_operation: HashMap::new(),
            executors: BTreeMap::new(),
            next_operation_id: 1,
            next_write_id: HashMap::new(),
        }
    }

    /// Acquires the chunk lock, resolves locations, connects the chain, and
    /// brings every executor to `Running`. On any failure, everything
    /// acquired so far is released and the coordinator stays `Uninitialized`.
    pub fn init(
        &mut self,
        mut locator: L,
        connector: C,
        chunk_id: u64,
        timeout_ms: u32,
    ) -> Result<()> {
        if self.state != WriterState::Uninitialized {
            return Err(Error::InvalidState("init called twice"));
        }
        self.state = WriterState::Initializing;

        locator.lock_for_write(timeout_ms)?;
        let locations = match locator.locations(timeout_ms) {
            Ok(l) => l,
            Err(e) => {
                locator.unlock().ok();
                self.state = WriterState::Uninitialized;
                return Err(e);
            }
        };

        let chain = locations.chain();
        let chain_handle = match connector.connect_chain(&chain, timeout_ms) {
            Ok(h) => h,
            Err(e) => {
                locator.unlock().ok();
                self.state = WriterState::Uninitialized;
                return Err(e);
            }
        };

        let mut executors = BTreeMap::new();
        for (ct, stream) in chain_handle.streams {
            let server_addr = stream.peer_addr()?;
            match WriteExecutor::init(stream, server_addr, chunk_id, locations.version, ct, vec![], timeout_ms) {
                Ok(exec) => {
                    executors.insert(ct, exec);
                }
                Err(e) => {
                    for (_, mut exec) in executors {
                        exec.abort();
                    }
                    locator.unlock().ok();
                    self.state = WriterState::Uninitialized;
                    return Err(e);
                }
            }
        }

        self.locator = Some(locator);
        self.connector = Some(connector);
        self.chunk_id = chunk_id;
        self.version = locations.version;
        self.layout = locations.layout;
        self.executors = executors;
        self.state = WriterState::Accepting;
        log_info!("chunk {chunk_id} initialized, layout={:?}, version={}", self.layout, self.version);
        Ok(())
    }

    /// True while the coordinator accepts `addOperation` calls.
    pub fn accepts_new_operations(&self) -> bool {
        self.state == WriterState::Accepting
    }

    /// Number of operations buffered but not yet dispatched.
    pub fn pending_operations_count(&self) -> usize {
        self.pending_operations.len()
    }

    /// Number of operations either buffered or dispatched-but-incomplete.
    pub fn unfinished_operations_count(&self) -> usize {
        self.new_operations.len() + self.pending_operations.len()
    }

    /// Buffered blocks below this size are not worth submitting outside
    /// flush mode: `L` for XOR layouts, `1` for `Standard`.
    pub fn minimum_block_count_worth_writing(&self) -> u32 {
        self.layout.stripe_size()
    }

    fn part_chunk_type(&self, block_index: u64, stripe_size: u64) -> ChunkType {
        match self.layout {
            ChunkLayout::Standard => ChunkType::Standard,
            ChunkLayout::Xor(level) => {
                let part = (block_index % stripe_size) as u8 + 1;
                ChunkType::xor(level, part)
            }
        }
    }

    fn is_full(&self, op: &Operation) -> bool {
        op.parts.len() as u32 == self.layout.stripe_size()
    }

    fn op_start(&self, op: &Operation) -> u64 {
        op.stripe_index * self.layout.stripe_size() as u64 * self.block_size
    }

    fn overlaps(&self, a: &Operation, b: &Operation) -> bool {
        let a_start = self.op_start(a);
        let b_start = self.op_start(b);
        !(a.offset_of_end <= b_start || b.offset_of_end <= a_start)
    }

    fn collides_with_pending(&self, op: &Operation) -> bool {
        let op_full = self.is_full(op);
        self.pending_operations
            .values()
            .any(|p| (op_full || self.is_full(p)) && self.overlaps(op, p))
    }

    fn can_start(&self, op: &Operation) -> bool {
        if !matches!(self.state, WriterState::Accepting | WriterState::Flushing) {
            return false;
        }
        if self.collides_with_pending(op) {
            return false;
        }
        matches!(self.layout, ChunkLayout::Standard)
            || self.is_full(op)
            || self.state == WriterState::Flushing
    }

    /// Appends `block` to the journal, merging or expanding an existing
    /// not-yet-started operation when possible, per the grouping rules.
    pub fn add_operation(&mut self, block: WriteCacheBlock) -> Result<()> {
        if self.state != WriterState::Accepting {
            return Err(Error::InvalidState("add_operation outside Accepting"));
        }

        let stripe_size = self.layout.stripe_size() as u64;
        let block_index = block.block_index() as u64;
        let stripe_index = block_index / stripe_size;
        let part_ct = self.part_chunk_type(block_index, stripe_size);
        let block_end = block.end();
        let chunk_offset_end = block_index * self.block_size + block_end as u64;

        if let Some(idx) = self
            .new_operations
            .iter()
            .rposition(|op| op.stripe_index == stripe_index)
        {
            if let Some(&pos) = self.new_operations[idx].parts.get(&part_ct) {
                let existing = self
                    .journal
                    .get_mut(pos)
                    .expect("journal entry for tracked part must exist");
                existing.merge(block);
                let merged_end = block_index * self.block_size + existing.end() as u64;
                let op = &mut self.new_operations[idx];
                op.offset_of_end = op.offset_of_end.max(merged_end);
                return Ok(());
            }

            // isExpandPossible: only XOR stripes (S == L) may grow by adding
            // a part the operation doesn't already hold.
            if stripe_size > 1 {
                let pos = self.journal.push(block);
                let op = &mut self.new_operations[idx];
                op.parts.insert(part_ct, pos);
                op.offset_of_end = op.offset_of_end.max(chunk_offset_end);
                return Ok(());
            }
        }

        let pos = self.journal.push(block);
        let mut parts = BTreeMap::new();
        parts.insert(part_ct, pos);
        self.new_operations.push(Operation {
            id: 0,
            stripe_index,
            parts,
            parity: None,
            unfinished_writes: 0,
            offset_of_end: chunk_offset_end,
        });
        Ok(())
    }

    /// Dispatches every currently-startable buffered operation. In
    /// `Dropping` state, instead discards all buffered operations (their
    /// journal entries included) without starting them.
    pub fn start_new_operations(&mut self, timeout_ms: u32) -> Result<()> {
        if self.state == WriterState::Dropping {
            for op in self.new_operations.drain(..) {
                for pos in op.parts.values() {
                    self.journal.remove(*pos);
                }
            }
            return Ok(());
        }
        if !matches!(self.state, WriterState::Accepting | WriterState::Flushing) {
            return Err(Error::InvalidState("start_new_operations outside Accepting/Flushing"));
        }

        let mut i = 0;
        while i < self.new_operations.len() {
            if self.can_start(&self.new_operations[i]) {
                let op = self.new_operations.remove(i);
                self.dispatch_operation(op, timeout_ms)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    fn next_write_id(&mut self, ct: ChunkType) -> u32 {
        let counter = self.next_write_id.entry(ct).or_insert(0);
        *counter += 1;
        *counter
    }

    fn dispatch_operation(&mut self, mut op: Operation, timeout_ms: u32) -> Result<()> {
        let id = self.next_operation_id;
        self.next_operation_id += 1;
        op.id = id;

        match self.layout {
            ChunkLayout::Standard => {
                let (ct, pos) = op
                    .parts
                    .iter()
                    .next()
                    .map(|(ct, pos)| (*ct, *pos))
                    .expect("standard operation always has exactly one part");
                let block = self
                    .journal
                    .get(pos)
                    .cloned()
                    .expect("journal entry for dispatched part must exist");
                let write_id = self.next_write_id(ct);
                self.enqueue(ct, write_id, &block)?;
                self.write_id_to_operation.insert(write_id, id);
                op.unfinished_writes = 1;
            }
            ChunkLayout::Xor(level) => {
                let locator = self
                    .locator
                    .as_mut()
                    .expect("dispatch_operation only runs after init");
                for part in 1..=level {
                    let ct = ChunkType::xor(level, part);
                    if !op.parts.contains_key(&ct) {
                        let block_index = op.stripe_index * level as u64 + (part as u64 - 1);
                        let bytes = locator.read_block(ct, block_index as u32, timeout_ms)?;
                        let pos = self.journal.push(WriteCacheBlock::new(block_index as u32, 0, bytes));
                        op.parts.insert(ct, pos);
                    }
                }

                let max_end = (1..=level)
                    .map(|part| {
                        let pos = op.parts[&ChunkType::xor(level, part)];
                        self.journal.get(pos).unwrap().end() as usize
                    })
                    .max()
                    .unwrap_or(0);
                let mut parity = vec![0u8; max_end];
                for part in 1..=level {
                    let pos = op.parts[&ChunkType::xor(level, part)];
                    let block = self.journal.get(pos).unwrap();
                    xor_into(&mut parity, block.offset() as usize, block.payload());
                }

                for part in 1..=level {
                    let ct = ChunkType::xor(level, part);
                    let pos = op.parts[&ct];
                    let block = self
                        .journal
                        .get(pos)
                        .cloned()
                        .expect("journal entry for dispatched part must exist");
                    let write_id = self.next_write_id(ct);
                    self.enqueue(ct, write_id, &block)?;
                    self.write_id_to_operation.insert(write_id, id);
                }

                let parity_ct = ChunkType::xor_parity(level);
                let parity_block = WriteCacheBlock::new(op.stripe_index as u32, 0, parity.clone());
                let write_id = self.next_write_id(parity_ct);
                self.enqueue(parity_ct, write_id, &parity_block)?;
                self.write_id_to_operation.insert(write_id, id);

                op.unfinished_writes = level as u32 + 1;
                op.parity = Some(parity);
            }
        }

        self.pending_operations.insert(id, op);
        Ok(())
    }

    fn enqueue(&mut self, ct: ChunkType, write_id: u32, block: &WriteCacheBlock) -> Result<()> {
        self.executors
            .get_mut(&ct)
            .ok_or(Error::InvalidState("no executor for chunk type"))?
            .enqueue_write(write_id, block)
    }

    /// Advances I/O on every executor for up to `timeout_ms`, reconciling
    /// completions. The only suspension point in the whole pipeline.
    pub fn process_operations(&mut self, timeout_ms: u32) -> Result<()> {
        if !matches!(
            self.state,
            WriterState::Accepting | WriterState::Flushing | WriterState::Dropping | WriterState::Draining
        ) {
            return Err(Error::InvalidState("process_operations in terminal state"));
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let parts: Vec<ChunkType> = self.executors.keys().copied().collect();
        let mut fatal: Option<Error> = None;

        'outer: for ct in parts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let events = {
                let executor = self.executors.get_mut(&ct).expect("executor present");
                executor.poll(Instant::now() + remaining)
            };
            match events {
                Ok(events) => {
                    for ev in events {
                        if let Err(e) = self.handle_status_event(ev) {
                            fatal = Some(e);
                            break 'outer;
                        }
                    }
                }
                Err(e) => {
                    fatal = Some(e);
                    break 'outer;
                }
            }
        }

        if let Some(e) = fatal {
            self.abort_operations_internal();
            return Err(e);
        }

        Ok(())
    }

    fn handle_status_event(&mut self, ev: crate::executor::StatusEvent) -> Result<()> {
        let op_id = self
            .write_id_to_operation
            .remove(&ev.write_id)
            .ok_or_else(|| ExecutorError::ProtocolViolation(format!("unknown write id {}", ev.write_id)))?;

        match ev.outcome {
            StatusOutcome::Success => {
                let complete = {
                    let op = self
                        .pending_operations
                        .get_mut(&op_id)
                        .expect("pending operation must exist for a tracked write id");
                    op.unfinished_writes -= 1;
                    op.unfinished_writes == 0
                };
                if complete {
                    let op = self.pending_operations.remove(&op_id).unwrap();
                    for pos in op.parts.values() {
                        self.journal.remove(*pos);
                    }
                }
                Ok(())
            }
            StatusOutcome::ServerError(code) => Err(ExecutorError::ServerError(code).into()),
        }
    }

    /// `Accepting` → `Flushing`: partial stripes become eligible for
    /// dispatch.
    pub fn start_flush_mode(&mut self) -> Result<()> {
        if self.state != WriterState::Accepting {
            return Err(Error::InvalidState("start_flush_mode outside Accepting"));
        }
        self.state = WriterState::Flushing;
        Ok(())
    }

    /// `Accepting`/`Flushing` → `Dropping`: buffered-but-not-started
    /// operations are discarded immediately; only already-dispatched work
    /// continues to drain.
    pub fn drop_new_operations(&mut self) -> Result<()> {
        if !matches!(self.state, WriterState::Accepting | WriterState::Flushing) {
            return Err(Error::InvalidState("drop_new_operations outside Accepting/Flushing"));
        }
        for op in self.new_operations.drain(..) {
            for pos in op.parts.values() {
                self.journal.remove(*pos);
            }
        }
        self.state = WriterState::Dropping;
        Ok(())
    }

    /// Waits for all buffered and pending operations to resolve, issues
    /// `WRITE_END` on every executor, releases the chain, and unlocks via
    /// the locator. Degrades to [`Self::abort_operations`] if `timeout_ms`
    /// elapses first.
    pub fn finish(&mut self, timeout_ms: u32) -> Result<()> {
        if !matches!(self.state, WriterState::Flushing | WriterState::Dropping) {
            return Err(Error::InvalidState("finish called before startFlushMode/dropNewOperations"));
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        loop {
            let remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u32;
            self.start_new_operations(remaining_ms)?;
            if self.new_operations.is_empty() && self.pending_operations.is_empty() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.process_operations(remaining.as_millis() as u32)?;
        }

        if !(self.new_operations.is_empty() && self.pending_operations.is_empty()) {
            self.abort_operations_internal();
            return Err(Error::Timeout);
        }

        self.state = WriterState::Draining;
        for exec in self.executors.values_mut() {
            exec.shutdown()?;
        }

        let end_deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1) as u64);
        loop {
            let mut all_closed = true;
            for exec in self.executors.values_mut() {
                if exec.state() != ExecutorState::Closed {
                    exec.poll(end_deadline.min(Instant::now() + Duration::from_millis(10)))?;
                    if exec.state() != ExecutorState::Closed {
                        all_closed = false;
                    }
                }
            }
            if all_closed || Instant::now() >= end_deadline {
                break;
            }
        }

        let chain_streams: Vec<(ChunkType, std::net::TcpStream)> = std::mem::take(&mut self.executors)
            .into_iter()
            .map(|(ct, exec)| (ct, exec.into_stream()))
            .collect();
        if let Some(connector) = self.connector.take() {
            connector.release_chain(ChainHandle { streams: chain_streams });
        }
        if let Some(mut locator) = self.locator.take() {
            locator.unlock()?;
        }

        self.state = WriterState::Finished;
        Ok(())
    }

    /// Hard-cancels every executor and releases the lock without waiting
    /// for pending work. The journal is preserved; call
    /// [`Self::release_journal`] afterward to recover buffered blocks.
    pub fn abort_operations(&mut self) {
        self.abort_operations_internal();
    }

    fn abort_operations_internal(&mut self) {
        if self.state == WriterState::Aborted {
            return;
        }
        for (_, mut exec) in std::mem::take(&mut self.executors) {
            exec.abort();
        }
        if let Some(mut locator) = self.locator.take() {
            locator.unlock().ok();
        }
        self.connector = None;
        self.state = WriterState::Aborted;
    }

    /// Drains and returns every block still held by the journal, in journal
    /// order, so the caller may route them to a fresh `ChunkWriter`.
    pub fn release_journal(&mut self) -> Vec<WriteCacheBlock> {
        self.journal.drain_all()
    }

    /// Current lifecycle state, for diagnostics and tests.
    pub fn state(&self) -> WriterState {
        self.state
    }
}

impl<L: Locator, C: ChunkConnector> Drop for ChunkWriter<L, C> {
    fn drop(&mut self) {
        if !matches!(self.state, WriterState::Finished | WriterState::Aborted | WriterState::Uninitialized) {
            self.abort_operations_internal();
        }
    }
}

fn xor_into(dst: &mut [u8], offset: usize, payload: &[u8]) {
    for (i, b) in payload.iter().enumerate() {
        dst[offset + i] ^= b;
    }
}
