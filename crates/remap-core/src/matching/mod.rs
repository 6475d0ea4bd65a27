pub mod anchors;
pub mod classes;
pub mod context;
pub mod fields;
pub mod mapping;
pub mod names;
pub mod propagation;
pub mod refinement;
pub mod select;
pub mod similarity;
