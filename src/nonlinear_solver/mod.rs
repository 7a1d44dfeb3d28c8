pub mod convergence;
pub mod line_search;
pub mod newton;
pub mod root;
