//! Optional JavaScript rendering through a fixed pool of browser drivers
//!
//! A [`Renderer`] turns a URL into rendered markup. Drivers are expensive,
//! so the crawler keeps a fixed number of them in a [`CheckoutPool`] and
//! fetch workers borrow one per page through a [`Checkout`] guard that
//! always returns the driver, even when rendering fails.

use crate::utils::error::RenderError;
use crate::utils::truncate_text;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::process::Command;
use tracing::{debug, warn};

/// Produces rendered page markup for a URL
pub trait Renderer: Send {
    fn render(&mut self, url: &str) -> Result<Vec<u8>, RenderError>;
}

/// Renderer backed by a headless browser invoked once per page
///
/// The URL is appended as the last argument and the rendered DOM is read
/// from stdout, e.g. `chromium --headless --disable-gpu --dump-dom <url>`.
#[derive(Debug, Clone)]
pub struct CommandRenderer {
    program: String,
    args: Vec<String>,
}

impl CommandRenderer {
    /// Build from a full argv; `None` when the argv is empty
    pub fn new(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    /// Build from a whitespace-separated command line
    pub fn from_command_line(command: &str) -> Option<Self> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        Self::new(&argv)
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Renderer for CommandRenderer {
    fn render(&mut self, url: &str) -> Result<Vec<u8>, RenderError> {
        debug!(program = %self.program, url, "Rendering page");
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .output()?;

        if !output.status.success() {
            return Err(RenderError::Failed {
                status: output.status.to_string(),
                stderr: truncate_text(String::from_utf8_lossy(&output.stderr).trim(), 500),
            });
        }
        if output.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(RenderError::EmptyOutput);
        }
        Ok(output.stdout)
    }
}

/// Fixed-size pool handing out exclusive access to its items
pub struct CheckoutPool<T> {
    state: Mutex<PoolState<T>>,
    returned: Condvar,
    size: usize,
}

struct PoolState<T> {
    idle: Vec<T>,
    closed: bool,
}

impl<T> CheckoutPool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let size = items.len();
        Self {
            state: Mutex::new(PoolState {
                idle: items,
                closed: false,
            }),
            returned: Condvar::new(),
            size,
        }
    }

    /// Number of items the pool was created with
    pub fn size(&self) -> usize {
        self.size
    }

    /// Items currently checked in
    pub fn available(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Wait for an item; `None` once the pool has been closed
    pub fn checkout(&self) -> Option<Checkout<'_, T>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(item) = state.idle.pop() {
                return Some(Checkout {
                    pool: self,
                    item: Some(item),
                });
            }
            self.returned.wait(&mut state);
        }
    }

    pub fn try_checkout(&self) -> Option<Checkout<'_, T>> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.idle.pop().map(|item| Checkout {
            pool: self,
            item: Some(item),
        })
    }

    /// Close the pool and drop the idle items
    ///
    /// Waiting checkouts return `None`; items still checked out are dropped
    /// when their guard is released. Idempotent.
    pub fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        if !idle.is_empty() {
            debug!(released = idle.len(), "Released pooled drivers");
        }
        drop(idle);
        self.returned.notify_all();
    }

    fn checkin(&self, item: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.idle.push(item);
        drop(state);
        self.returned.notify_one();
    }
}

impl<T> Drop for CheckoutPool<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.idle.len() < self.size && !state.closed {
            warn!(
                outstanding = self.size - state.idle.len(),
                "Driver pool dropped with items checked out"
            );
        }
    }
}

/// Exclusive borrow of a pooled item, checked back in on drop
pub struct Checkout<'a, T> {
    pool: &'a CheckoutPool<T>,
    item: Option<T>,
}

impl<T> Deref for Checkout<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("checkout item is only taken on drop"),
        }
    }
}

impl<T> DerefMut for Checkout<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("checkout item is only taken on drop"),
        }
    }
}

impl<T> Drop for Checkout<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.checkin(item);
        }
    }
}

/// Pool of boxed renderers shared by the fetch workers
pub type RendererPool = CheckoutPool<Box<dyn Renderer>>;

/// Render `url` with a pooled driver; `None` if the pool is closed or rendering fails
pub fn render_with(pool: &RendererPool, url: &str) -> Option<Vec<u8>> {
    let mut driver = pool.checkout()?;
    match driver.render(url) {
        Ok(markup) => Some(markup),
        Err(e) => {
            warn!(url, error = %e, "Rendering failed, keeping raw body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    struct StaticRenderer(&'static str);

    impl Renderer for StaticRenderer {
        fn render(&mut self, url: &str) -> Result<Vec<u8>, RenderError> {
            Ok(format!("{}{url}", self.0).into_bytes())
        }
    }

    struct FailingRenderer;

    impl Renderer for FailingRenderer {
        fn render(&mut self, _url: &str) -> Result<Vec<u8>, RenderError> {
            Err(RenderError::EmptyOutput)
        }
    }

    #[test]
    fn test_checkout_returns_item_on_drop() {
        let pool = CheckoutPool::new(vec![1, 2]);
        {
            let a = pool.checkout().unwrap();
            let _b = pool.checkout().unwrap();
            assert_eq!(pool.available(), 0);
            assert!(pool.try_checkout().is_none());
            assert!(*a == 1 || *a == 2);
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_checkout_waits_for_return() {
        let pool = Arc::new(CheckoutPool::new(vec![0u32]));
        let held = pool.checkout().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let mut item = pool.checkout().unwrap();
                *item += 1;
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        drop(held);
        waiter.join().unwrap();
        assert_eq!(*pool.checkout().unwrap(), 1);
    }

    #[test]
    fn test_close_releases_waiters() {
        let pool = Arc::new(CheckoutPool::new(vec![()]));
        let held = pool.checkout().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkout().is_none())
        };
        thread::sleep(Duration::from_millis(20));
        pool.close();
        assert!(waiter.join().unwrap());
        drop(held);
        assert_eq!(pool.available(), 0);
        assert!(pool.is_closed());
    }

    #[test]
    fn test_render_failure_still_checks_in() {
        let pool: RendererPool = CheckoutPool::new(vec![Box::new(FailingRenderer)]);
        assert!(render_with(&pool, "https://a.test/").is_none());
        assert_eq!(pool.available(), 1);

        let pool: RendererPool = CheckoutPool::new(vec![Box::new(StaticRenderer("dom:"))]);
        assert_eq!(
            render_with(&pool, "https://a.test/").unwrap(),
            b"dom:https://a.test/".to_vec()
        );
    }

    #[test]
    fn test_command_renderer_from_command_line() {
        let renderer = CommandRenderer::from_command_line("chromium --headless --dump-dom").unwrap();
        assert_eq!(renderer.program(), "chromium");
        assert_eq!(renderer.args, vec!["--headless", "--dump-dom"]);
        assert!(CommandRenderer::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_command_renderer_captures_stdout() {
        let mut renderer = CommandRenderer::from_command_line("echo").unwrap();
        let out = renderer.render("https://a.test/").unwrap();
        assert_eq!(String::from_utf8(out).unwrap().trim(), "https://a.test/");

        let mut failing = CommandRenderer::from_command_line("false").unwrap();
        assert!(matches!(failing.render("x"), Err(RenderError::Failed { .. })));
    }
}
