/// Tells the host that some piece of page state changed and should be re-read
pub trait StateUpdateSender: Send + Sync {
    fn send_update(&self);
}

/// Short, transient message shown to the user (a toast on the web, a system
/// notification on mobile)
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}
