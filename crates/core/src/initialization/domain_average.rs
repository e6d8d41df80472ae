//! Uniform domain-average initialization.

use super::{fill_columns, ColumnInput, FlowInitializer, InitializedFlow};
use crate::core_types::polar::wind_sd_to_uv;
use crate::error::RunResult;
use crate::grid::Mesh;
use crate::simulation::config::{DomainAverageInput, RunConfiguration};
use tracing::debug;

/// One speed and direction applied at the same height above the vegetation everywhere.
#[derive(Debug, Clone)]
pub struct DomainAverageInitializer {
    input: DomainAverageInput,
}

impl DomainAverageInitializer {
    pub fn new(input: DomainAverageInput) -> Self {
        Self { input }
    }
}

impl FlowInitializer for DomainAverageInitializer {
    fn name(&self) -> &'static str {
        "domain average"
    }

    fn initialize_fields(&self, config: &RunConfiguration, mesh: &Mesh) -> RunResult<InitializedFlow> {
        let (u, v) = wind_sd_to_uv(self.input.speed, self.input.direction)?;
        debug!(
            "Domain average {:.2} m/s from {:.1} deg at {:.1} m (u={:.3}, v={:.3})",
            self.input.speed, self.input.direction, self.input.input_height, u, v
        );
        let column = ColumnInput {
            u,
            v,
            input_height: self.input.input_height,
        };
        let (u0, bl_height) = fill_columns(config, mesh, |_, _| Ok(column))?;
        let dem = mesh.terrain().dem();
        Ok(InitializedFlow {
            u0,
            cloud: dem.like(self.input.cloud_cover),
            air_temperature: dem.like(self.input.temperature),
            bl_height,
        })
    }
}
