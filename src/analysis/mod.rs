pub mod dominators;
pub mod locality;
pub mod regions;

pub use dominators::DomTree;
pub use locality::LocalityInfo;
pub use regions::Region;
