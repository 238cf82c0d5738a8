//! Binary record layouts and the per-forest entities built on top of them.
//!
//! `HaloRecord` mirrors the LHaloTree on-disk halo (zero-copy parsing).

use serde::Serialize;
use std::fmt;

/// LHaloTree halo - 104 bytes
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct HaloRecord {
    // Merger tree links (20 bytes), -1 = none
    pub descendant: i32,
    pub first_progenitor: i32,
    pub next_progenitor: i32,
    pub first_halo_in_fof_group: i32,
    pub next_halo_in_fof_group: i32,

    // Properties (60 bytes)
    pub len: i32,
    pub m_mean200: f32,
    pub mvir: f32,
    pub m_tophat: f32,
    pub pos: [f32; 3],
    pub vel: [f32; 3],
    pub vel_disp: f32,
    pub vmax: f32,
    pub spin: [f32; 3],

    // Original simulation bookkeeping (24 bytes)
    pub most_bound_id: i64,
    pub snap_num: i32,
    pub file_nr: i32,
    pub subhalo_index: i32,
    pub sub_half_mass: f32,
}

// Compile-time size check
const _: () = assert!(std::mem::size_of::<HaloRecord>() == 104);

pub const HALO_RECORD_SIZE: usize = std::mem::size_of::<HaloRecord>();

/// Tree file header: total forests (i32) then total halos (i32).
pub const TREE_FILE_PREAMBLE: u64 = 8;

impl HaloRecord {
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < HALO_RECORD_SIZE {
            return None;
        }

        // SAFETY: length checked, HaloRecord is repr(C, packed) plain data
        Some(unsafe { std::ptr::read_unaligned(data.as_ptr() as *const HaloRecord) })
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: packed plain data, every byte is initialized
        unsafe {
            std::slice::from_raw_parts(self as *const HaloRecord as *const u8, HALO_RECORD_SIZE)
        }
    }
}

/// Per-halo bookkeeping produced alongside the galaxies of a forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HaloAux {
    /// Index into the forest's galaxies of the first galaxy hosted by this halo.
    pub first_galaxy: Option<usize>,
    pub n_galaxies: usize,
}

/// Model-computed galaxy properties. Carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GalaxyProperties {
    pub pos: [f32; 3],
    pub vel: [f32; 3],
    pub mvir: f32,
    pub cold_gas: f32,
    pub stellar_mass: f32,
    pub hot_gas: f32,
    pub black_hole_mass: f32,
    pub sfr: f32,
}

impl GalaxyProperties {
    pub const FLOAT_COUNT: usize = 12;
}

/// One galaxy of a forest.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Galaxy {
    pub snap_num: i32,
    pub galaxy_type: i32,
    /// Forest-local galaxy number.
    pub galaxy_nr: u32,
    /// Index into the forest's halos.
    pub halo_nr: usize,
    pub merge_type: i32,
    /// Before saving: index into the forest's galaxies. After: write position.
    pub merge_into: Option<usize>,
    pub merge_into_snap: i32,
    /// Output snapshot slot assigned while saving.
    pub output_slot: Option<usize>,
    pub galaxy_index: u64,
    pub central_galaxy_index: u64,
    pub properties: GalaxyProperties,
}

impl fmt::Display for Galaxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "galaxy {} (halo {}, snap {}, index {})",
            self.galaxy_nr, self.halo_nr, self.snap_num, self.galaxy_index
        )
    }
}
