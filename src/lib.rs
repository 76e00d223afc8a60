pub mod attribute;
pub mod config;
pub mod coords;
pub mod driver;
pub mod errors;
pub mod extractor;
pub mod layer;
pub mod mvt;
pub mod osm;
pub mod output_object;
pub mod output_sink;
pub mod shapefile_source;
pub mod tile;
pub mod tile_data;
pub mod tile_index;
pub mod tile_worker;
