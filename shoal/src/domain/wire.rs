// SPDX-License-Identifier: AGPL-3.0-only

//! Serialized particle records for the migration protocol.
//!
//! Emigrants and immigrants travel between subdomains as flat byte
//! buffers of fixed-size records: 64-bit integers little-endian,
//! positions/velocities/forces as platform-endian IEEE-754 doubles. The
//! records are plain-old-data, so encoding is a cast, not a copy loop.

use bytemuck::{Pod, Zeroable};

use crate::error::{Result, ShoalError};
use crate::particle::{OwnershipState, Particle};

/// One particle on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    /// Particle id, little-endian.
    pub id: u64,
    /// Type tag, little-endian.
    pub type_id: u64,
    /// Ownership discriminant, little-endian.
    pub ownership: i64,
    /// Position.
    pub pos: [f64; 3],
    /// Velocity.
    pub vel: [f64; 3],
    /// Accumulated force.
    pub force: [f64; 3],
}

impl From<&Particle> for ParticleRecord {
    fn from(p: &Particle) -> Self {
        Self {
            id: p.id.to_le(),
            type_id: p.type_id.to_le(),
            ownership: (p.ownership as i64).to_le(),
            pos: p.pos,
            vel: p.vel,
            force: p.force,
        }
    }
}

impl ParticleRecord {
    /// Decodes the record back into a particle.
    ///
    /// # Errors
    ///
    /// [`ShoalError::InvalidArgument`] for an unknown ownership
    /// discriminant.
    pub fn to_particle(&self) -> Result<Particle> {
        let ownership = OwnershipState::from_i64(i64::from_le(self.ownership)).ok_or_else(|| {
            ShoalError::InvalidArgument(format!(
                "unknown ownership discriminant {} on the wire",
                self.ownership
            ))
        })?;
        Ok(Particle {
            id: u64::from_le(self.id),
            type_id: u64::from_le(self.type_id),
            pos: self.pos,
            vel: self.vel,
            force: self.force,
            ownership,
        })
    }
}

/// Encodes particles into a wire buffer.
#[must_use]
pub fn encode(particles: &[Particle]) -> Vec<u8> {
    let records: Vec<ParticleRecord> = particles.iter().map(ParticleRecord::from).collect();
    bytemuck::cast_slice(&records).to_vec()
}

/// Decodes a wire buffer back into particles.
///
/// # Errors
///
/// [`ShoalError::InvalidArgument`] when the buffer length is not a
/// multiple of the record size or a record is malformed.
pub fn decode(buffer: &[u8]) -> Result<Vec<Particle>> {
    let record_size = std::mem::size_of::<ParticleRecord>();
    if buffer.len() % record_size != 0 {
        return Err(ShoalError::InvalidArgument(format!(
            "wire buffer of {} bytes is not a multiple of the {record_size}-byte record",
            buffer.len()
        )));
    }
    let records: &[ParticleRecord] = bytemuck::try_cast_slice(buffer).map_err(|e| {
        ShoalError::InvalidArgument(format!("wire buffer cast failed: {e}"))
    })?;
    records.iter().map(ParticleRecord::to_particle).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Particle> {
        let mut a = Particle::new(42, [1.0, 2.0, 3.0]);
        a.vel = [0.1, -0.2, 0.3];
        a.force = [9.0, 8.0, 7.0];
        a.type_id = 3;
        let b = Particle::new(7, [0.5, 0.5, 0.5]).as_halo([-0.5, 0.5, 0.5]);
        vec![a, b]
    }

    #[test]
    fn record_has_no_padding() {
        // 3 integers + 9 doubles, all 8 bytes.
        assert_eq!(std::mem::size_of::<ParticleRecord>(), 96);
    }

    #[test]
    fn roundtrip_preserves_everything() {
        let particles = sample();
        let buffer = encode(&particles);
        assert_eq!(buffer.len(), 2 * 96);
        let Ok(decoded) = decode(&buffer) else {
            panic!("decode must succeed");
        };
        assert_eq!(decoded, particles);
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buffer = encode(&sample());
        assert!(decode(&buffer[..95]).is_err());
    }

    #[test]
    fn unknown_ownership_is_rejected() {
        let mut record = ParticleRecord::from(&sample()[0]);
        record.ownership = 99;
        let buffer: Vec<u8> = bytemuck::bytes_of(&record).to_vec();
        assert!(decode(&buffer).is_err());
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        let Ok(decoded) = decode(&[]) else {
            panic!("empty buffer is valid");
        };
        assert!(decoded.is_empty());
    }
}
