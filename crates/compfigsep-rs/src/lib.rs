pub mod augment;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod evaluator;
pub mod export;
pub mod geometry;
pub mod label;
pub mod params;
pub mod predictions;
pub mod reduce;
pub mod types;

pub use dataset::{DatasetRegistry, FigureProvider, InMemoryFigureProvider, JsonFigureProvider};
pub use error::{Error, Result};
pub use eval::{evaluate_figures, AccumulatedEval, FigureEval};
pub use evaluator::{DatasetEvaluator, PanelSegEvaluator, TaskMetrics};
pub use export::{export_figures_to_json, ExportOutcome};
pub use geometry::BBox;
pub use label::{LabelStructure, LabelStructureEnum};
pub use params::{EvalParams, ExportConfig, Task};
pub use predictions::{Detection, ModelInput, ModelOutput, PredictionStore};
pub use reduce::{ChannelCommunicator, Communicator, LocalCommunicator};
pub use types::{Figure, Label, Panel, SubFigure};
