//! Timers and byte counters for the communication engine.
//!
//! Algorithms fill an [`AllreduceStats`] for the call they run and hand it
//! back; the engine merges it into its process-wide [`CommStats`].

use std::ops::AddAssign;
use std::time::{Duration, Instant};

/// Phase timers and byte counters accumulated over allreduce calls.
///
/// A combined send+receive exchange is charged in full to both the send
/// and the receive timers of its phase.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllreduceStats {
    pub calls: u64,
    pub ar_time: Duration,
    pub rs_time: Duration,
    pub ag_time: Duration,
    pub send_transform_time: Duration,
    pub recv_transform_time: Duration,
    pub recv_apply_transform_time: Duration,
    pub send_time: Duration,
    pub recv_time: Duration,
    pub rs_send_time: Duration,
    pub rs_recv_time: Duration,
    pub ag_send_time: Duration,
    pub ag_recv_time: Duration,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rs_bytes_sent: u64,
    pub rs_bytes_received: u64,
    pub ag_bytes_sent: u64,
    pub ag_bytes_received: u64,
}

/// Which phase an exchange belongs to, for attributing its cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepKind {
    /// Full-buffer exchange of recursive doubling.
    Whole,
    ReduceScatter,
    Allgather,
}

impl AllreduceStats {
    /// Charge one exchange of `sent` bytes out and `received` bytes in that
    /// took `elapsed`.
    pub(crate) fn record_exchange(
        &mut self,
        kind: StepKind,
        elapsed: Duration,
        sent: usize,
        received: usize,
    ) {
        let (sent, received) = (sent as u64, received as u64);
        self.send_time += elapsed;
        self.recv_time += elapsed;
        self.bytes_sent += sent;
        self.bytes_received += received;
        match kind {
            StepKind::Whole => {}
            StepKind::ReduceScatter => {
                self.rs_send_time += elapsed;
                self.rs_recv_time += elapsed;
                self.rs_bytes_sent += sent;
                self.rs_bytes_received += received;
            }
            StepKind::Allgather => {
                self.ag_send_time += elapsed;
                self.ag_recv_time += elapsed;
                self.ag_bytes_sent += sent;
                self.ag_bytes_received += received;
            }
        }
    }
}

impl AddAssign for AllreduceStats {
    fn add_assign(&mut self, o: Self) {
        self.calls += o.calls;
        self.ar_time += o.ar_time;
        self.rs_time += o.rs_time;
        self.ag_time += o.ag_time;
        self.send_transform_time += o.send_transform_time;
        self.recv_transform_time += o.recv_transform_time;
        self.recv_apply_transform_time += o.recv_apply_transform_time;
        self.send_time += o.send_time;
        self.recv_time += o.recv_time;
        self.rs_send_time += o.rs_send_time;
        self.rs_recv_time += o.rs_recv_time;
        self.ag_send_time += o.ag_send_time;
        self.ag_recv_time += o.ag_recv_time;
        self.bytes_sent += o.bytes_sent;
        self.bytes_received += o.bytes_received;
        self.rs_bytes_sent += o.rs_bytes_sent;
        self.rs_bytes_received += o.rs_bytes_received;
        self.ag_bytes_sent += o.ag_bytes_sent;
        self.ag_bytes_received += o.ag_bytes_received;
    }
}

/// Process-wide counters kept by the engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommStats {
    /// Bytes handed to the transport by every primitive and collective.
    pub bytes_sent: u64,
    /// Bytes received (as reported by the receive path) by every primitive
    /// and collective.
    pub bytes_received: u64,
    pub num_model_barriers: u64,
    pub num_intermodel_barriers: u64,
    pub num_global_barriers: u64,
    pub allreduce: AllreduceStats,
}

impl CommStats {
    /// Fold one allreduce call into the totals.
    pub fn merge_allreduce(&mut self, ar: AllreduceStats) {
        self.bytes_sent += ar.bytes_sent;
        self.bytes_received += ar.bytes_received;
        self.allreduce += ar;
    }
}

/// Run `f` and add its wall time to `acc`.
pub(crate) fn timed<T>(acc: &mut Duration, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    *acc += start.elapsed();
    out
}
