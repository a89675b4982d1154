pub mod column;
pub mod data_source;
pub mod sample;
pub mod virtual_base_view;
pub mod virtual_view;

pub use column::*;
pub use data_source::*;
pub use sample::*;
pub use virtual_base_view::*;
pub use virtual_view::*;
