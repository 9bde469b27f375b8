//! Export state machine.
//!
//! Drives the document page through its export sequence:
//! `Idle -> MenuOpened -> ExportMenuOpened -> ExportTypeSelected -> Downloading`.
//! Each transition walks an ordered list of selector strategies specific to
//! the document kind; the first clickable match advances the machine, and
//! exhausting every strategy fails the document (no self-retry).

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::driver::{DriverError, ExportDriver, Selector};
use crate::models::DocKind;

/// Steps of the export sequence, for error context.
pub const STEP_MENU: &str = "file menu";
pub const STEP_EXPORT: &str = "export entry";
pub const STEP_EXPORT_TYPE: &str = "export type";

const MENU_SELECTORS: &[Selector] = &[Selector {
    css: "#main-menu-file",
    label: "file menu button",
}];

// Sheets and docs label their export submenu differently; the bare
// submenu class is the shared fallback.
const SHEET_EXPORT: &[Selector] = &[
    Selector {
        css: "li.mainmenu-submenu-exportAs",
        label: "sheet export submenu",
    },
    Selector {
        css: "li[class*='mainmenu-submenu']",
        label: "generic submenu",
    },
];

const DOC_EXPORT: &[Selector] = &[
    Selector {
        css: "li.mainmenu-submenu-export-as",
        label: "doc export submenu",
    },
    Selector {
        css: "li[class*='mainmenu-submenu']",
        label: "generic submenu",
    },
];

const SHEET_EXPORT_TYPE: &[Selector] = &[
    Selector {
        css: "li.mainmenu-item-export-local",
        label: "sheet local export",
    },
    Selector {
        css: "li[class*='export-local']",
        label: "local export fallback",
    },
];

const DOC_EXPORT_TYPE: &[Selector] = &[
    Selector {
        css: "li.mainmenu-item-export-as-docx",
        label: "docx export",
    },
    Selector {
        css: "li[class*='export-as-docx']",
        label: "docx export fallback",
    },
];

const OTHER_EXPORT_TYPE: &[Selector] = &[
    Selector {
        css: "li[class*='export']",
        label: "any export item",
    },
    Selector {
        css: "button[class*='export']",
        label: "any export button",
    },
];

/// Labels the confirmation affordance may carry. The export UI is the
/// Chinese-language docs product; "下载" is its download button.
const CONFIRM_LABELS: &[&str] = &["确定", "确认", "下载"];

fn export_selectors(kind: DocKind) -> &'static [Selector] {
    match kind {
        DocKind::Sheet => SHEET_EXPORT,
        DocKind::Doc | DocKind::Other => DOC_EXPORT,
    }
}

fn export_type_selectors(kind: DocKind) -> &'static [Selector] {
    match kind {
        DocKind::Sheet => SHEET_EXPORT_TYPE,
        DocKind::Doc => DOC_EXPORT_TYPE,
        DocKind::Other => OTHER_EXPORT_TYPE,
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    /// Every selector strategy for a transition came up empty.
    #[error("no clickable element for {step}")]
    ElementNotFound { step: &'static str },
    #[error(transparent)]
    Driver(DriverError),
}

/// Machine states. Terminal success is reaching `Downloading`; failure is
/// surfaced as an `ExportError` by `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    MenuOpened,
    ExportMenuOpened,
    ExportTypeSelected,
    Downloading,
}

/// Pauses between transitions, from configuration.
#[derive(Debug, Clone)]
pub struct ExportWaits {
    /// Bounded wait for the primary menu button.
    pub element_wait: Duration,
    /// Bounded wait per fallback selector strategy.
    pub fallback_wait: Duration,
    /// Settle after opening the file menu.
    pub menu_wait: Duration,
    /// Settle after clicking the export entry.
    pub click_wait: Duration,
    /// Settle before scanning for a confirmation affordance.
    pub confirm_wait: Duration,
}

pub struct ExportMachine<'a> {
    driver: &'a dyn ExportDriver,
    waits: &'a ExportWaits,
    phase: Phase,
}

impl<'a> ExportMachine<'a> {
    pub fn new(driver: &'a dyn ExportDriver, waits: &'a ExportWaits) -> Self {
        Self {
            driver,
            waits,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Run the export sequence for a page already navigated and settled.
    /// Returns once the download trigger click has happened; waiting for the
    /// file itself is the completion detector's job.
    pub async fn run(&mut self, kind: DocKind) -> Result<(), ExportError> {
        self.transition(STEP_MENU, MENU_SELECTORS, self.waits.element_wait, Phase::MenuOpened)
            .await?;
        tokio::time::sleep(self.waits.menu_wait).await;

        self.transition(
            STEP_EXPORT,
            export_selectors(kind),
            self.waits.fallback_wait,
            Phase::ExportMenuOpened,
        )
        .await?;
        tokio::time::sleep(self.waits.click_wait).await;

        self.transition(
            STEP_EXPORT_TYPE,
            export_type_selectors(kind),
            self.waits.fallback_wait,
            Phase::ExportTypeSelected,
        )
        .await?;

        // Some exports pop a confirmation dialog, most do not; absence is
        // not an error.
        tokio::time::sleep(self.waits.confirm_wait).await;
        match self.driver.click_confirmation(CONFIRM_LABELS).await {
            Ok(true) => info!("Confirmation clicked"),
            Ok(false) => debug!("No confirmation dialog present"),
            Err(e) => warn!("Confirmation scan failed: {}", e),
        }

        self.phase = Phase::Downloading;
        Ok(())
    }

    async fn transition(
        &mut self,
        step: &'static str,
        candidates: &[Selector],
        each_wait: Duration,
        next: Phase,
    ) -> Result<(), ExportError> {
        match self.driver.find_clickable(step, candidates, each_wait).await {
            Ok(strategy) => {
                debug!("{} matched strategy {}", step, strategy + 1);
                self.phase = next;
                Ok(())
            }
            Err(DriverError::ElementNotFound(_)) => {
                Err(ExportError::ElementNotFound { step })
            }
            Err(e) => Err(ExportError::Driver(e)),
        }
    }
}
