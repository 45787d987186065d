// ── Interface layout and class-ID allocation ──

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::model::{ClassId, Direction};

/// Handle of the multiqueue root qdisc on every shaped interface.
pub const MQ_MAJOR: u16 = 0x7FFF;
/// Minor of each CPU's root class.
pub const ROOT_MINOR: u16 = 1;
/// Minor of each CPU's default (unclassified traffic) class.
pub const DEFAULT_MINOR: u16 = 2;
/// First minor handed to nodes and circuits.
pub const FIRST_MINOR: u16 = 3;

/// Where each direction is shaped and how majors are numbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceLayout {
    pub download_interface: String,
    pub upload_interface: String,
    pub on_a_stick: bool,
    /// CPU queues per direction.
    pub queues: u32,
}

impl InterfaceLayout {
    pub fn interface(&self, direction: Direction) -> &str {
        match direction {
            Direction::Download => &self.download_interface,
            Direction::Upload => &self.upload_interface,
        }
    }

    /// Upload majors are shifted past the download ones on a stick.
    pub fn stick_offset(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Upload if self.on_a_stick => self.queues,
            _ => 0,
        }
    }

    /// HTB major of `cpu` in `direction`: `cpu + 1`, plus the stick offset.
    pub fn major(&self, direction: Direction, cpu: u32) -> u16 {
        let major = cpu + 1 + self.stick_offset(direction);
        u16::try_from(major).unwrap_or(MQ_MAJOR - 1)
    }

    pub fn class_id(&self, direction: Direction, cpu: u32, minor: u16) -> ClassId {
        ClassId::new(self.major(direction, cpu), minor)
    }

    /// CPU that classification steers a direction's traffic to.
    pub fn steering_cpu(&self, direction: Direction, cpu: u32) -> u32 {
        cpu + self.stick_offset(direction)
    }

    /// Directions that get their own IP mapping. Off a stick the XDP map is
    /// keyed by IP only, so one (download) entry serves both interfaces.
    pub fn mapped_directions(&self) -> &'static [Direction] {
        if self.on_a_stick {
            &Direction::BOTH
        } else {
            &[Direction::Download]
        }
    }
}

/// Per-CPU minor counters. Download and upload share minors, so one counter
/// per CPU serves both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassIdAllocator {
    next: Vec<u16>,
}

impl ClassIdAllocator {
    pub fn new(queues: u32) -> Self {
        Self {
            next: vec![FIRST_MINOR; usize::try_from(queues).unwrap_or(0)],
        }
    }

    /// Resume above the highest minor already handed out per CPU.
    pub fn resume(queues: u32, used: impl IntoIterator<Item = (u32, u16)>) -> Self {
        let mut allocator = Self::new(queues);
        for (cpu, minor) in used {
            if let Some(next) = allocator.slot(cpu) {
                *next = (*next).max(minor.saturating_add(1));
            }
        }
        allocator
    }

    fn slot(&mut self, cpu: u32) -> Option<&mut u16> {
        usize::try_from(cpu).ok().and_then(|idx| self.next.get_mut(idx))
    }

    pub fn allocate(&mut self, cpu: u32, major: u16) -> Result<u16, CoreError> {
        let next = self
            .slot(cpu)
            .ok_or(CoreError::ClassIdExhausted { major })?;
        if *next == u16::MAX {
            return Err(CoreError::ClassIdExhausted { major });
        }
        let minor = *next;
        *next += 1;
        Ok(minor)
    }

    /// Highest minor handed out on `cpu` so far (2 when none).
    pub fn high_water(&self, cpu: u32) -> u16 {
        usize::try_from(cpu)
            .ok()
            .and_then(|idx| self.next.get(idx))
            .map_or(DEFAULT_MINOR, |next| next - 1)
    }
}
