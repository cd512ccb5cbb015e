pub mod edit;
pub mod feature;
pub mod field;
pub mod geometry;
pub mod raster;
pub mod service;

pub use edit::{EditError, EditOutcome, EditResult, PublishOutcome};
pub use feature::{Feature, FeatureSet};
pub use field::{Field, FieldType};
pub use geometry::{Envelope, Geometry, GeometryType, SpatialReference};
pub use raster::{BandStats, RasterTile};
pub use service::{
    AdvancedQueryCapabilities, FeatureLayer, FeatureService, FeatureServiceInfo, ImageService,
    ImageServiceInfo, LayerInfo, LayerSummary, Service,
};
