//! Standard line wiring.
//!
//! The canonical eight-machine cheddar line in processing order. Stage
//! identifiers are fixed so logs and reports from different runs line
//! up machine for machine.

use curdline_core::error::SimError;
use curdline_core::id::StageId;
use curdline_core::pipeline::Pipeline;

use crate::params::LineParams;
use crate::{cheddaring, cutter, drainer, pasteuriser, presser, ripener, salting, vat};

pub const PASTEURISER: StageId = StageId(0);
pub const VAT: StageId = StageId(1);
pub const CUTTER: StageId = StageId(2);
pub const DRAINER: StageId = StageId(3);
pub const CHEDDARING: StageId = StageId(4);
pub const SALTING: StageId = StageId(5);
pub const PRESSER: StageId = StageId(6);
pub const RIPENER: StageId = StageId(7);

/// Build the full line. The ripener is terminal; wheels end the run on
/// the cellar shelf and the record stream is the product.
pub fn standard_line(seed: u64, params: &LineParams) -> Result<Pipeline, SimError> {
    params.validate()?;
    let cap = params.buffer_capacity;
    let p = params.anomaly_probability;

    Pipeline::builder(seed)
        .stage(pasteuriser::stage_def(PASTEURISER, &params.pasteuriser), cap, p)
        .stage(vat::stage_def(VAT, &params.vat), cap, p)
        .stage(cutter::stage_def(CUTTER, &params.cutter), cap, p)
        .stage(drainer::stage_def(DRAINER, &params.drainer), cap, p)
        .stage(cheddaring::stage_def(CHEDDARING, &params.cheddaring), cap, p)
        .stage(salting::stage_def(SALTING, &params.salting), cap, p)
        .stage(presser::stage_def(PRESSER, &params.presser), cap, p)
        .stage(ripener::stage_def(RIPENER, &params.ripener), cap, p)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fx;
    use curdline_core::batch::Batch;
    use curdline_core::id::BatchId;
    use curdline_core::sched::RunState;

    fn milk(id: u64, litres: f64) -> Batch {
        Batch::milk(BatchId(id), fx(litres), fx(4.0), fx(6.7))
    }

    #[test]
    fn one_batch_flows_end_to_end() {
        let mut line = standard_line(11, &LineParams::default()).unwrap();
        line.seed(milk(1, 300.0)).unwrap();
        assert_eq!(line.run_until(1_000_000).unwrap(), RunState::Drained);

        let reports = line.reports();
        assert_eq!(reports.len(), 8);
        for report in &reports {
            assert_eq!(report.batches_done, 1, "stage {} stalled", report.name);
        }

        // The cellar holds most of the expected cheese weight.
        let cellar = reports.last().unwrap();
        assert!(cellar.final_vars.aux[0] > fx(10.0));
        assert!(cellar.final_vars.aux[0] < fx(40.0));
    }

    #[test]
    fn stage_order_matches_the_line() {
        let line = standard_line(11, &LineParams::default()).unwrap();
        assert_eq!(
            line.stage_order(),
            &[
                PASTEURISER, VAT, CUTTER, DRAINER, CHEDDARING, SALTING, PRESSER, RIPENER
            ]
        );
    }

    #[test]
    fn invalid_params_fail_before_wiring() {
        let mut params = LineParams::default();
        params.salting.salt_recipe = fx(2.0);
        assert!(standard_line(11, &params).is_err());
    }
}
