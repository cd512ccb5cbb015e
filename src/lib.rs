pub mod auth;
pub mod client;
pub mod config;
pub mod dataset;
pub mod error;
pub mod http;
pub mod model;
pub mod query;
pub mod reader;
mod response;
pub mod writer;

pub use auth::{Credentials, Session, Token};
pub use client::Client;
pub use config::Config;
pub use dataset::{DatasetKind, LocalDataset};
pub use error::{Result, ServiceError};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use model::{
    EditOutcome, Envelope, Feature, FeatureLayer, FeatureService, FeatureSet, Field, FieldType,
    ImageService, PublishOutcome, RasterTile, Service, SpatialReference,
};
pub use query::{PixelType, Query, RasterRequest};
pub use writer::GeoTiffWriter;
