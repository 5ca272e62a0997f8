pub mod bayes_opt;
pub mod convex_scalar;
pub mod store;

pub use bayes_opt::BayesOptMinimizer;
pub use convex_scalar::ConvexScalarMinimizer;
pub use store::{MinimizerRecord, MinimizerStore, MinimizerType};
