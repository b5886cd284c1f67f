//! CycleLogService - Completed Capture Cycles (Ring Buffer)
//!
//! ## Responsibilities
//!
//! - Keep the most recent cycle reports in memory
//! - Assign cycle ids
//! - Provide latest-N queries

use crate::capture_orchestrator::CycleReport;
use std::collections::VecDeque;
use tokio::sync::RwLock;

struct CycleRingBuffer {
    reports: VecDeque<CycleReport>,
    capacity: usize,
    next_id: u64,
}

impl CycleRingBuffer {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            reports: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, mut report: CycleReport) -> CycleReport {
        report.cycle_id = self.next_id;
        self.next_id += 1;

        if self.reports.len() >= self.capacity {
            self.reports.pop_front();
        }
        self.reports.push_back(report.clone());
        report
    }

    fn get_latest(&self, count: usize) -> Vec<CycleReport> {
        self.reports.iter().rev().take(count).cloned().collect()
    }
}

/// CycleLogService instance
pub struct CycleLogService {
    buffer: RwLock<CycleRingBuffer>,
}

impl CycleLogService {
    /// Create new CycleLogService
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(CycleRingBuffer::new(capacity)),
        }
    }

    /// Append a report; returns it with its assigned id
    pub async fn record(&self, report: CycleReport) -> CycleReport {
        let mut buffer = self.buffer.write().await;
        let report = buffer.push(report);
        tracing::debug!(cycle_id = report.cycle_id, "Cycle recorded");
        report
    }

    /// Latest reports, newest first
    pub async fn get_latest(&self, count: usize) -> Vec<CycleReport> {
        self.buffer.read().await.get_latest(count)
    }

    pub async fn get(&self, cycle_id: u64) -> Option<CycleReport> {
        let buffer = self.buffer.read().await;
        buffer.reports.iter().find(|r| r.cycle_id == cycle_id).cloned()
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.reports.len()
    }
}

impl Default for CycleLogService {
    fn default() -> Self {
        Self::new(200)
    }
}
