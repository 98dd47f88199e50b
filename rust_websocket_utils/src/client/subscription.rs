// rust_websocket_utils/src/client/subscription.rs

//! 订阅句柄。

use std::fmt;

/// 订阅返回的释放器。
///
/// 句柄被丢弃或调用 `dispose()` 时，对应的回调被注销；注销只影响这一个回调，
/// 不会影响同类型的其他订阅，也不会关闭底层连接。
#[must_use = "丢弃 Subscription 会立即注销回调"]
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl Subscription {
    pub fn new<F>(disposer: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { disposer: Some(Box::new(disposer)) }
    }

    /// 立即注销回调。
    pub fn dispose(mut self) {
        self.run_disposer();
    }

    fn run_disposer(&mut self) {
        if let Some(disposer) = self.disposer.take() {
            disposer();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_disposer();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.disposer.is_some())
            .finish()
    }
}
