//! Non-blocking GPU step timing with timestamp queries.
//!
//! A step writes a begin timestamp at the start of its first pass and an end
//! timestamp at the end of its last pass, resolves them, and copies them to a
//! staging buffer that is then mapped asynchronously. Later steps poll the
//! mapping; until it completes no new query is issued and the last measured
//! duration stays in place.

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

/// Two u64 timestamps.
const QUERY_BYTES: u64 = 2 * std::mem::size_of::<u64>() as u64;

/// Timestamp query resources and the last measured duration.
pub struct FrameTimer {
    query_set: wgpu::QuerySet,
    resolve_buf: wgpu::Buffer,
    staging_buf: wgpu::Buffer,
    /// Nanoseconds per timestamp tick.
    period: f32,
    /// Set while the staging buffer is being mapped or is awaiting a copy.
    pending: Option<Receiver<Result<(), wgpu::BufferAsyncError>>>,
    /// A query was recorded into the command buffer just submitted.
    recorded: bool,
    last: Option<Duration>,
}

impl FrameTimer {
    /// `None` when the device was created without `TIMESTAMP_QUERY`.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Option<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return None;
        }
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("step_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: 2,
        });
        let resolve_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_resolve"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_staging"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Some(Self {
            query_set,
            resolve_buf,
            staging_buf,
            period: queue.get_timestamp_period(),
            pending: None,
            recorded: false,
            last: None,
        })
    }

    /// Last measured step duration.
    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    /// Whether this step may record a new query.
    pub fn ready(&self) -> bool {
        self.pending.is_none()
    }

    /// Timestamp writes for the first pass of a step, if a query may be issued.
    pub fn begin_writes(&self) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        self.ready().then_some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: None,
        })
    }

    /// Timestamp writes for the last pass of a step, if a query may be issued.
    pub fn end_writes(&self) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        self.ready().then_some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: None,
            end_of_pass_write_index: Some(1),
        })
    }

    /// Resolve the query into the staging buffer. Call after the step's
    /// passes were encoded with [`begin_writes`](Self::begin_writes) and
    /// [`end_writes`](Self::end_writes).
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        if !self.ready() {
            return;
        }
        encoder.resolve_query_set(&self.query_set, 0..2, &self.resolve_buf, 0);
        encoder.copy_buffer_to_buffer(&self.resolve_buf, 0, &self.staging_buf, 0, QUERY_BYTES);
        self.recorded = true;
    }

    /// Start mapping the staging buffer. Call right after submitting the
    /// command buffer passed to [`resolve`](Self::resolve).
    pub fn after_submit(&mut self) {
        if !self.recorded {
            return;
        }
        self.recorded = false;
        let (tx, rx) = mpsc::channel();
        self.staging_buf
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = tx.send(result);
            });
        self.pending = Some(rx);
    }

    /// Check, without blocking, whether the pending query result arrived.
    /// The device must have been polled for the map callback to fire.
    pub fn poll(&mut self) {
        let Some(rx) = &self.pending else {
            return;
        };
        match rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                tracing::debug!("timestamp map callback dropped; sample discarded");
                self.pending = None;
            }
            Ok(Err(e)) => {
                tracing::debug!("timestamp map failed: {e}; sample discarded");
                self.pending = None;
            }
            Ok(Ok(())) => {
                let ticks: Vec<u64> = {
                    let data = self.staging_buf.slice(..).get_mapped_range();
                    super::buffers::decode(&data)
                };
                self.staging_buf.unmap();
                self.pending = None;
                match elapsed(&ticks, self.period) {
                    Some(d) => self.last = Some(d),
                    None => tracing::debug!(?ticks, "garbage timestamp sample discarded"),
                }
            }
        }
    }
}

/// Duration between two timestamps, or `None` if the pair is unusable.
fn elapsed(ticks: &[u64], period_ns: f32) -> Option<Duration> {
    let [begin, end] = ticks else {
        return None;
    };
    if end <= begin || !(period_ns > 0.0) {
        return None;
    }
    let ns = (end - begin) as f64 * period_ns as f64;
    ns.is_finite().then(|| Duration::from_nanos(ns as u64))
}
