//! 会话监管：服务级取消
//!
//! 持有根 CancellationToken；每轮对话取子 token，服务关闭时统一取消，
//! 被取消的轮次丢弃其线程句柄从而释放锁。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: CancellationToken,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触发取消（服务关闭）
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 创建子 token（用于单轮对话）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}
