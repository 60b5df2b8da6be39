//! Built-in schemas for known detector setups.

use simtab_core::{ColumnId, ColumnKind, SchemaViolation, TableId};

use crate::SchemaRegistry;

/// Default output base name for K600 runs.
pub const K600_BASE_NAME: &str = "K600Output";

/// Maximum number of LaBr3:Ce hits recorded per event.
pub const K600_LABR3_CAPACITY: u32 = 16;

/// Column handles for the coincident-events table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataTreeColumns {
    /// Table ID.
    pub table: TableId,
    /// Number of LaBr3:Ce hits in the event; fold of every array below.
    pub event_fold: ColumnId,
    /// Detector number per hit.
    pub number: ColumnId,
    /// Deposited energy per hit.
    pub energy: ColumnId,
    /// Polar angle per hit.
    pub theta: ColumnId,
    /// Azimuthal angle per hit.
    pub phi: ColumnId,
    /// Hit position, x.
    pub x_pos: ColumnId,
    /// Hit position, y.
    pub y_pos: ColumnId,
    /// Hit position, z.
    pub z_pos: ColumnId,
}

/// Column handles for the geometry-analysis table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryColumns {
    /// Table ID.
    pub table: TableId,
    /// CAKE detector number.
    pub cake_no: ColumnId,
    /// CAKE ring.
    pub cake_row: ColumnId,
    /// CAKE sector.
    pub cake_sector: ColumnId,
    /// Polar angle.
    pub theta: ColumnId,
    /// Azimuthal angle.
    pub phi: ColumnId,
}

/// Column handles for the input-variable table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputVariableColumns {
    /// Table ID.
    pub table: TableId,
    /// Sampled polar angle.
    pub theta_dist: ColumnId,
    /// Sampled azimuthal angle.
    pub phi_dist: ColumnId,
    /// Polar angle projected on x.
    pub theta_proj_x: ColumnId,
    /// Polar angle projected on y.
    pub theta_proj_y: ColumnId,
}

/// Handles for all K600 tables, returned by [`k600`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct K600Tables {
    /// `DataTreeSim`.
    pub data: DataTreeColumns,
    /// `GeometryAnalysisTree`.
    pub geometry: GeometryColumns,
    /// `InputVariableTree`.
    pub input: InputVariableColumns,
}

/// Define the K600 spectrometer tables on `registry`.
///
/// The registry must be unsealed and must not already hold tables with
/// the same names.
pub fn k600(registry: &mut SchemaRegistry) -> Result<K600Tables, SchemaViolation> {
    let seq = ColumnKind::RealArray {
        capacity: K600_LABR3_CAPACITY,
    };

    let t = registry.define_table("DataTreeSim", "K600 Spectrometer - Coincident Events")?;
    let event_fold = registry.add_column(t, "LaBr3Ce_EventFold", ColumnKind::Int)?;
    let number = registry.add_column(
        t,
        "LaBr3Ce_Number",
        ColumnKind::IntArray {
            capacity: K600_LABR3_CAPACITY,
        },
    )?;
    let energy = registry.add_column(t, "LaBr3Ce_Energy", seq)?;
    let theta = registry.add_column(t, "Theta", seq)?;
    let phi = registry.add_column(t, "Phi", seq)?;
    let x_pos = registry.add_column(t, "xPos", seq)?;
    let y_pos = registry.add_column(t, "yPos", seq)?;
    let z_pos = registry.add_column(t, "zPos", seq)?;
    for col in [number, energy, theta, phi, x_pos, y_pos, z_pos] {
        registry.bind_fold(t, col, event_fold)?;
    }
    let data = DataTreeColumns {
        table: t,
        event_fold,
        number,
        energy,
        theta,
        phi,
        x_pos,
        y_pos,
        z_pos,
    };

    let t = registry.define_table("GeometryAnalysisTree", "K600 Spectrometer - GeometryAnalysis")?;
    let geometry = GeometryColumns {
        table: t,
        cake_no: registry.add_column(t, "CAKENo", ColumnKind::Int)?,
        cake_row: registry.add_column(t, "CAKE_RowNo", ColumnKind::Int)?,
        cake_sector: registry.add_column(t, "CAKE_SectorNo", ColumnKind::Int)?,
        theta: registry.add_column(t, "Theta", ColumnKind::Real)?,
        phi: registry.add_column(t, "Phi", ColumnKind::Real)?,
    };

    let t = registry.define_table("InputVariableTree", "K600 Spectrometer - InputVariable")?;
    let input = InputVariableColumns {
        table: t,
        theta_dist: registry.add_column(t, "ThetaDist", ColumnKind::Real)?,
        phi_dist: registry.add_column(t, "PhiDist", ColumnKind::Real)?,
        theta_proj_x: registry.add_column(t, "ThetaDist_projX", ColumnKind::Real)?,
        theta_proj_y: registry.add_column(t, "ThetaDist_projY", ColumnKind::Real)?,
    };

    Ok(K600Tables {
        data,
        geometry,
        input,
    })
}
