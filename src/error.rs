//! 四叉树错误类型

use parry2d::math::Real;
use thiserror::Error;

/// 四叉树操作可能返回的错误，都可由调用方恢复
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuadTreeError {
    /// 位置在根节点范围外，插入或移动被拒绝，树不变
    #[error("position ({x}, {y}) is outside the tree bounds")]
    OutOfBounds { x: Real, y: Real },

    /// 构建参数非法，不会生成树
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// 指定的id不在树中
    #[error("object not found")]
    NotFound,

    /// 指定的id已在树中
    #[error("object already exists")]
    AlreadyExists,
}

pub type Result<T> = std::result::Result<T, QuadTreeError>;
