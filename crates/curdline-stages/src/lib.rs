//! Machine definitions for the cheddar line.
//!
//! Each module builds one [`curdline_core::stage::StageDef`] from a
//! parameter record: the pasteuriser, the cheese vat, the curd cutter,
//! the whey drainer, the cheddaring table, salting, the press, and the
//! ripening cellar. [`line::standard_line`] wires all eight into a
//! ready-to-run [`curdline_core::pipeline::Pipeline`].
//!
//! Physics is fixed-point throughout and every draw comes from the
//! pipeline's seeded streams, so a run is a pure function of seed and
//! settings.

pub mod cheddaring;
pub mod cutter;
#[cfg(feature = "data-loader")]
pub mod data_loader;
pub mod drainer;
pub mod line;
pub mod params;
pub mod pasteuriser;
pub mod presser;
pub mod ripener;
pub mod salting;
pub mod vat;

#[cfg(test)]
pub(crate) mod testkit;
