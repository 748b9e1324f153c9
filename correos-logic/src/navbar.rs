use serde::{Deserialize, Serialize};

/// Scrolled further than this and the bar shrinks
pub const SHRINK_OFFSET: f64 = 8.0;
/// Scrolling down past this hides the bar
pub const HIDE_OFFSET: f64 = 50.0;

/// How the navigation bar should currently look
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct NavBarFrame {
    pub shrink: bool,
    pub hidden: bool,
    /// Top padding for the page body so content starts below the bar
    pub body_padding: f64,
}

pub trait NavBarView: Send + Sync {
    fn apply(&self, frame: &NavBarFrame);
    /// Reflect the mobile menu state, also used for `aria-expanded`
    fn set_menu_open(&self, open: bool);
}

pub struct NavBarController<B: NavBarView> {
    view: B,
    last_y: f64,
    frame: NavBarFrame,
    menu_open: bool,
}

impl<B: NavBarView> NavBarController<B> {
    pub fn new(view: B) -> Self {
        Self {
            view,
            last_y: 0.0,
            frame: NavBarFrame::default(),
            menu_open: false,
        }
    }

    pub fn frame(&self) -> NavBarFrame {
        self.frame
    }

    pub fn on_scroll(&mut self, y: f64, menu_height: f64) -> NavBarFrame {
        self.frame.shrink = y > SHRINK_OFFSET;
        self.frame.hidden = y > self.last_y && y > HIDE_OFFSET;
        self.last_y = y;
        self.on_resize(menu_height)
    }

    /// Handle several scroll samples delivered at once, only the newest is drawn
    pub fn on_scroll_burst(&mut self, samples: &[(f64, f64)]) -> Option<NavBarFrame> {
        samples
            .last()
            .map(|&(y, menu_height)| self.on_scroll(y, menu_height))
    }

    pub fn on_resize(&mut self, menu_height: f64) -> NavBarFrame {
        self.frame.body_padding = menu_height.max(0.0);
        self.view.apply(&self.frame);
        self.frame
    }

    /// Flip the mobile menu, returns whether it's now open
    pub fn toggle_menu(&mut self) -> bool {
        self.menu_open = !self.menu_open;
        self.view.set_menu_open(self.menu_open);
        self.menu_open
    }
}
