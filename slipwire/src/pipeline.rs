//! Pipeline runtime: ordered stage chains applied symmetrically on send and
//! receive, with per-connection scratch and header reservation.

/// Identifier of a registered pipeline. Carried in the `flags` byte of Data
/// headers, so both peers must register pipelines in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PipelineId(pub u8);

impl PipelineId {
    /// The default pipeline: a single no-op stage, raw datagrams flow through.
    pub const NULL: PipelineId = PipelineId(0);
}

/// Capacity hints a stage declares at registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageCapacities {
    /// Persistent receive-side scratch bytes
    pub receive_capacity: usize,
    /// Persistent send-side scratch bytes
    pub send_capacity: usize,
    /// Header bytes reserved at the front of every outbound buffer
    pub header_capacity: usize,
    /// Scratch shared between both directions
    pub shared_capacity: usize,
}

/// Out-parameters a stage raises while processing a buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineRequests {
    /// Re-emit the outbound the stage reconstructed into the buffer
    pub resend: bool,
    /// Re-run this stage in the service phase without new input
    pub update: bool,
    /// Drop the buffer and fail the operation
    pub error: bool,
}

/// The stage's persistent buffers for one connection.
pub struct StageIo<'a> {
    pub send_scratch: &'a mut [u8],
    pub recv_scratch: &'a mut [u8],
    pub shared_scratch: &'a mut [u8],
}

/// A packet flowing through a stage chain.
///
/// `data[start..end]` is the current packet; `data[..start]` is reserved
/// header room. Send stages prepend into the reservation, receive stages
/// strip their header off the front.
pub struct PacketBuffer<'a> {
    data: &'a mut [u8],
    start: usize,
    end: usize,
}

impl<'a> PacketBuffer<'a> {
    pub fn new(data: &'a mut [u8], start: usize, end: usize) -> Self {
        debug_assert!(start <= end && end <= data.len());
        Self { data, start, end }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..self.end]
    }

    /// Prepends bytes into the reserved header region.
    pub fn prepend(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.start {
            return false;
        }
        self.start -= bytes.len();
        self.data[self.start..self.start + bytes.len()].copy_from_slice(bytes);
        true
    }

    /// Strips `count` bytes off the front of the packet.
    pub fn strip(&mut self, count: usize) -> bool {
        if count > self.len() {
            return false;
        }
        self.start += count;
        true
    }

    /// Replaces the packet with `bytes`, written at the payload start.
    pub fn set_payload(&mut self, bytes: &[u8]) -> bool {
        if self.start + bytes.len() > self.data.len() {
            return false;
        }
        self.data[self.start..self.start + bytes.len()].copy_from_slice(bytes);
        self.end = self.start + bytes.len();
        true
    }

    /// Empties the packet; the chain emits nothing.
    pub fn clear(&mut self) {
        self.end = self.start;
    }
}

/// Stage behavior: a function-pointer table plus capacity hints.
#[derive(Clone, Copy)]
pub struct PipelineStage {
    pub send: fn(&mut StageIo<'_>, &mut PacketBuffer<'_>, &mut PipelineRequests),
    pub receive: fn(&mut StageIo<'_>, &mut PacketBuffer<'_>, &mut PipelineRequests),
    pub initialize_connection: fn(&mut StageIo<'_>),
    pub capacities: StageCapacities,
}

fn null_pass(_io: &mut StageIo<'_>, _buffer: &mut PacketBuffer<'_>, _requests: &mut PipelineRequests) {
}

fn null_init(_io: &mut StageIo<'_>) {}

impl PipelineStage {
    /// The no-op stage used to pad pipelines and as the default pipeline.
    pub fn null() -> Self {
        Self {
            send: null_pass,
            receive: null_pass,
            initialize_connection: null_init,
            capacities: StageCapacities::default(),
        }
    }
}

struct StageSlot {
    stage: PipelineStage,
    /// Offsets of (send, recv, shared) scratch within the pipeline region
    send_offset: usize,
    recv_offset: usize,
    shared_offset: usize,
}

/// Result of running a chain over one buffer.
#[derive(Debug, Default)]
pub struct ChainOutcome {
    pub error: bool,
    /// Stages that asked to run again in the service phase
    pub update_stages: Vec<usize>,
    /// Stages holding a reconstructed outbound that should be re-emitted
    pub resend_stages: Vec<usize>,
}

/// An immutable ordered stage chain with a precomputed scratch layout.
pub struct Pipeline {
    stages: Vec<StageSlot>,
    header_reserve: usize,
    scratch_size: usize,
}

impl Pipeline {
    fn new(stages: Vec<PipelineStage>) -> Self {
        let mut slots = Vec::with_capacity(stages.len());
        let mut offset = 0;
        let mut header_reserve = 0;
        for stage in stages {
            let caps = stage.capacities;
            let send_offset = offset;
            let recv_offset = send_offset + caps.send_capacity;
            let shared_offset = recv_offset + caps.receive_capacity;
            offset = shared_offset + caps.shared_capacity;
            header_reserve += caps.header_capacity;
            slots.push(StageSlot {
                stage,
                send_offset,
                recv_offset,
                shared_offset,
            });
        }
        Self {
            stages: slots,
            header_reserve,
            scratch_size: offset,
        }
    }

    /// Total header bytes reserved at the front of outbound buffers.
    #[inline]
    pub fn header_reserve(&self) -> usize {
        self.header_reserve
    }

    /// Bytes of per-connection scratch this pipeline needs.
    #[inline]
    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    fn stage_io<'a>(&self, index: usize, scratch: &'a mut [u8]) -> StageIo<'a> {
        let slot = &self.stages[index];
        let caps = slot.stage.capacities;
        // Three disjoint regions carved out of one contiguous slice.
        let (_, rest) = scratch.split_at_mut(slot.send_offset);
        let (send_scratch, rest) = rest.split_at_mut(caps.send_capacity);
        let (recv_scratch, rest) = rest.split_at_mut(caps.receive_capacity);
        let (shared_scratch, _) = rest.split_at_mut(caps.shared_capacity);
        StageIo {
            send_scratch,
            recv_scratch,
            shared_scratch,
        }
    }

    /// Zeroes the scratch region and runs every stage's connection init.
    pub fn initialize(&self, scratch: &mut [u8]) {
        scratch.fill(0);
        for index in 0..self.stages.len() {
            let mut io = self.stage_io(index, scratch);
            (self.stages[index].stage.initialize_connection)(&mut io);
        }
    }

    /// Runs the send chain: last stage first, so outer headers end up
    /// outermost in the reserved region.
    pub fn run_send(&self, scratch: &mut [u8], buffer: &mut PacketBuffer<'_>) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        for index in (0..self.stages.len()).rev() {
            if !self.run_stage_send(index, scratch, buffer, &mut outcome) {
                break;
            }
        }
        outcome
    }

    /// Runs the send chain starting from one stage (service phase re-runs).
    pub fn run_send_from(
        &self,
        from_stage: usize,
        scratch: &mut [u8],
        buffer: &mut PacketBuffer<'_>,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        if self.stages.is_empty() {
            return outcome;
        }
        for index in (0..=from_stage.min(self.stages.len() - 1)).rev() {
            if !self.run_stage_send(index, scratch, buffer, &mut outcome) {
                break;
            }
        }
        outcome
    }

    fn run_stage_send(
        &self,
        index: usize,
        scratch: &mut [u8],
        buffer: &mut PacketBuffer<'_>,
        outcome: &mut ChainOutcome,
    ) -> bool {
        let mut requests = PipelineRequests::default();
        let mut io = self.stage_io(index, scratch);
        (self.stages[index].stage.send)(&mut io, buffer, &mut requests);
        if requests.resend {
            outcome.resend_stages.push(index);
        }
        if requests.update {
            outcome.update_stages.push(index);
        }
        if requests.error {
            outcome.error = true;
            return false;
        }
        true
    }

    /// Runs the receive chain: first stage first, stripping outer headers
    /// before inner ones.
    pub fn run_receive(&self, scratch: &mut [u8], buffer: &mut PacketBuffer<'_>) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();
        for index in 0..self.stages.len() {
            let mut requests = PipelineRequests::default();
            let mut io = self.stage_io(index, scratch);
            (self.stages[index].stage.receive)(&mut io, buffer, &mut requests);
            if requests.resend {
                outcome.resend_stages.push(index);
            }
            if requests.update {
                outcome.update_stages.push(index);
            }
            if requests.error {
                outcome.error = true;
                break;
            }
        }
        outcome
    }
}

/// All pipelines registered with a driver. Id 0 is always the null pipeline.
pub struct PipelineRegistry {
    pipelines: Vec<Pipeline>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self {
            pipelines: vec![Pipeline::new(vec![PipelineStage::null()])],
        }
    }

    pub fn create(&mut self, stages: Vec<PipelineStage>) -> PipelineId {
        // The id travels in the one-byte flags field.
        assert!(self.pipelines.len() < 256, "pipeline id space exhausted");
        self.pipelines.push(Pipeline::new(stages));
        PipelineId((self.pipelines.len() - 1) as u8)
    }

    pub fn get(&self, id: PipelineId) -> Option<&Pipeline> {
        self.pipelines.get(id.0 as usize)
    }

    /// Fresh, initialized scratch regions for a new connection, one per
    /// registered pipeline.
    pub fn create_connection_scratch(&self) -> Vec<Vec<u8>> {
        self.pipelines
            .iter()
            .map(|pipeline| {
                let mut scratch = vec![0u8; pipeline.scratch_size()];
                pipeline.initialize(&mut scratch);
                scratch
            })
            .collect()
    }
}

impl Default for PipelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
