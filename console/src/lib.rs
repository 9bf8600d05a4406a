pub mod access;
pub mod catalog;
pub mod console;
pub mod fleet;
pub mod locks;
pub mod promotion;
pub mod registry;

pub use access::AccessGate;
pub use catalog::ResourceCatalog;
pub use console::Console;
pub use fleet::{FleetError, FleetFile, FleetResult, StaticIntrospector, DEMO_FLEET};
pub use locks::KeyedLocks;
pub use promotion::{PendingPromotion, PromotionCanceller, PromotionEngine, PromotionLog};
pub use registry::EnvironmentRegistry;
