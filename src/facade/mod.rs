mod layer;

pub use layer::{QueryLayer, QueryLayerBuilder};
