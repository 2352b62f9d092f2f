/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Task profiles.
//!
//! A [`TaskProfile`] is an immutable per-cycle snapshot of the timing of one
//! task, or of the whole container (vector entry 0). Containers publish a
//! `Vec<TaskProfile>` on their `"Details"` port when profiling is enabled.
//!
//! # Wire format
//! Little-endian, fields in order: `last`, `max`, `average`, `total` (each
//! `i64` nanoseconds), `handle` (`u32`), `classification` (`u8`: 0 = SENSE,
//! 1 = CONTROL, 2 = OTHER). A vector is prefixed with its `u32` length.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

// ── TaskClass ─────────────────────────────────────────────────────────────────

/// Coarse classification of a schedule entry, as published in profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TaskClass {
    Sense = 0,
    Control = 1,
    #[default]
    Other = 2,
}

impl TryFrom<u8> for TaskClass {
    type Error = io::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TaskClass::Sense),
            1 => Ok(TaskClass::Control),
            2 => Ok(TaskClass::Other),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown task classification: {other}"),
            )),
        }
    }
}

// ── TaskProfile ───────────────────────────────────────────────────────────────

/// Timing snapshot of one task (or of the whole container).
///
/// All durations are nanoseconds. The maximum and average exclude the first
/// (warm-up) cycle, which is never profiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskProfile {
    /// Last execution duration.
    pub last_duration_ns: i64,

    /// Maximum execution duration.
    pub max_duration_ns: i64,

    /// Average execution duration.
    pub average_duration_ns: i64,

    /// Total execution duration.
    pub total_duration_ns: i64,

    /// Handle of the element associated with the task.
    pub handle: u32,

    /// Segment the task was scheduled in.
    pub classification: TaskClass,
}

impl TaskProfile {
    /// Serialized size of one record in bytes.
    pub const ENCODED_SIZE: usize = 8 * 4 + 4 + 1;

    /// Write this record to `writer` in wire order.
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_i64::<LittleEndian>(self.last_duration_ns)?;
        writer.write_i64::<LittleEndian>(self.max_duration_ns)?;
        writer.write_i64::<LittleEndian>(self.average_duration_ns)?;
        writer.write_i64::<LittleEndian>(self.total_duration_ns)?;
        writer.write_u32::<LittleEndian>(self.handle)?;
        writer.write_u8(self.classification as u8)?;
        Ok(())
    }

    /// Read one record from `reader`.
    ///
    /// # Errors
    /// `InvalidData` on an unknown classification byte; `UnexpectedEof` on
    /// truncated input.
    pub fn read_from(reader: &mut impl Read) -> io::Result<TaskProfile> {
        let last_duration_ns = reader.read_i64::<LittleEndian>()?;
        let max_duration_ns = reader.read_i64::<LittleEndian>()?;
        let average_duration_ns = reader.read_i64::<LittleEndian>()?;
        let total_duration_ns = reader.read_i64::<LittleEndian>()?;
        let handle = reader.read_u32::<LittleEndian>()?;
        let classification = TaskClass::try_from(reader.read_u8()?)?;
        Ok(TaskProfile {
            last_duration_ns,
            max_duration_ns,
            average_duration_ns,
            total_duration_ns,
            handle,
            classification,
        })
    }
}

/// Encode a profile vector: `u32` length prefix followed by the records.
pub fn encode_profiles(profiles: &[TaskProfile]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(4 + profiles.len() * TaskProfile::ENCODED_SIZE);
    buffer
        .write_u32::<LittleEndian>(profiles.len() as u32)
        .expect("writing to a Vec cannot fail");
    for profile in profiles {
        profile
            .write_to(&mut buffer)
            .expect("writing to a Vec cannot fail");
    }
    buffer
}

/// Decode a profile vector previously produced by [`encode_profiles`].
pub fn decode_profiles(bytes: &[u8]) -> io::Result<Vec<TaskProfile>> {
    let mut reader = bytes;
    let count = reader.read_u32::<LittleEndian>()? as usize;
    let mut profiles = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        profiles.push(TaskProfile::read_from(&mut reader)?);
    }
    Ok(profiles)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
