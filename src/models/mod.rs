pub mod node;
pub mod problem;
pub mod workspace;

pub use self::{
    node::WorkspaceNode,
    problem::ImportProblem,
    workspace::Workspace,
};
