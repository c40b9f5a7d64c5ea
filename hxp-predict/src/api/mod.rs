//! HTTP API handlers for hxp-predict

pub mod health;
pub mod model;
pub mod predict;
pub mod ui;

pub use health::health_routes;
pub use model::model_routes;
pub use predict::predict_routes;
pub use ui::ui_routes;
