//! 自适应四叉树
//! 叶子超过容量时分裂，子节点对象总数不超过容量时合并；也可按视点距离分裂合并，用于地形LOD。
//! 子象限顺序固定为 NE, NW, SW, SE。
//! 采用SlotMap存放四叉节点，用key代替指针，所有权只从父节点到子节点。

pub mod bounds;
pub mod error;
pub mod node;
pub mod object;
pub mod policy;
pub mod query;
pub mod tree;

pub use bounds::*;
pub use error::*;
pub use node::{DebugDraw, NodeView};
pub use object::*;
pub use policy::*;
pub use query::*;
pub use tree::*;
