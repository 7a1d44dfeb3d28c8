/// Undirected graph with one vertex per Jacobian column, used for column coloring.
pub type Graph = petgraph::graph::UnGraph<(), ()>;
