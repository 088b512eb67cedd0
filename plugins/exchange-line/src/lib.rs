//! Line exchange for modekey.
//!
//! `cxx` marks the caret's line; `cxx` on another line swaps the two.
//! `cxx` on the marked line, or `cxc` anywhere, clears the mark. Setting
//! `g:exchange_no_mappings` before the extension initializes skips the
//! default keys and leaves only the `<Plug>` names.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use modekey::extension::{
    ExtensionApi, ExtensionDescriptor, ExtensionError, ExtensionHandler, HandlerContext,
    HandlerError, VimExtension,
};
use modekey::host::EditorHost;
use modekey::mode::MappingModes;
use modekey::motion::{line_end, line_start};

pub const NAME: &str = "exchange";
pub const ALIAS: &str = "tommcdo/vim-exchange";
pub const PLUG_LINE: &str = "<Plug>(ExchangeLine)";
pub const PLUG_CLEAR: &str = "<Plug>(ExchangeClear)";

/// A marked line, without its newline
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mark {
    start: usize,
    end: usize,
    text: String,
}

impl Mark {
    fn at(text: &str, caret: usize) -> Self {
        let start = line_start(text, caret);
        let end = line_end(text, caret);
        Self {
            start,
            end,
            text: text[start..end].to_string(),
        }
    }

    /// Still the same line of the same text
    fn is_valid(&self, text: &str) -> bool {
        text.get(self.start..self.end) == Some(self.text.as_str())
            && line_start(text, self.start) == self.start
            && line_end(text, self.start) == self.end
    }
}

type SharedMark = Arc<Mutex<Option<Mark>>>;

struct ExchangeLine {
    mark: SharedMark,
}

impl ExchangeLine {
    fn swap(host: &mut dyn EditorHost, first: &Mark, second: &Mark) -> Result<(), HandlerError> {
        let (earlier, later) = if first.start < second.start {
            (first, second)
        } else {
            (second, first)
        };

        host.begin_undo_group();
        let result = (|| {
            host.set_caret(0, later.start);
            host.delete_text(later.start, later.end)?;
            host.insert_text(0, &earlier.text)?;
            host.set_caret(0, earlier.start);
            host.delete_text(earlier.start, earlier.end)?;
            host.insert_text(0, &later.text)
        })();
        host.end_undo_group();
        result?;

        // The caret stays on the line the exchange was finished from
        let caret = if second.start == later.start {
            later.start + later.text.len() - earlier.text.len()
        } else {
            earlier.start
        };
        host.set_caret(0, caret);
        Ok(())
    }
}

impl ExtensionHandler for ExchangeLine {
    fn execute(
        &self,
        host: &mut dyn EditorHost,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        let current = Mark::at(host.text(), host.caret(0));
        let previous = self.mark.lock().take();

        match previous {
            Some(previous) if !previous.is_valid(host.text()) => {
                debug!(line = %current.text, "exchange mark was stale, marking again");
                *self.mark.lock() = Some(current);
            }
            Some(previous) if previous.start == current.start => {
                debug!("exchange mark cleared");
            }
            Some(previous) => {
                debug!(from = previous.start, to = current.start, "exchanging lines");
                Self::swap(host, &previous, &current)?;
            }
            None => {
                debug!(line = %current.text, "exchange mark set");
                *self.mark.lock() = Some(current);
            }
        }
        Ok(())
    }

    fn is_repeatable(&self) -> bool {
        true
    }
}

struct ExchangeClear {
    mark: SharedMark,
}

impl ExtensionHandler for ExchangeClear {
    fn execute(
        &self,
        _host: &mut dyn EditorHost,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        self.mark.lock().take();
        Ok(())
    }
}

/// The `exchange` extension
#[derive(Default)]
pub struct Exchange {
    mark: SharedMark,
}

impl Exchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry entry with the `Plug` alias
    pub fn descriptor() -> ExtensionDescriptor {
        ExtensionDescriptor::new(Self::new()).with_alias(ALIAS)
    }
}

impl VimExtension for Exchange {
    fn name(&self) -> &str {
        NAME
    }

    fn init(&self, api: &mut ExtensionApi<'_>) -> Result<(), ExtensionError> {
        api.put_handler_mapping(
            MappingModes::NORMAL,
            PLUG_LINE,
            ExchangeLine {
                mark: self.mark.clone(),
            },
        )?;
        api.put_handler_mapping(
            MappingModes::NORMAL,
            PLUG_CLEAR,
            ExchangeClear {
                mark: self.mark.clone(),
            },
        )?;

        let skip_defaults = api
            .variable("g:exchange_no_mappings")
            .is_some_and(|value| value.is_truthy());
        if !skip_defaults {
            api.put_key_mapping_if_missing(MappingModes::NORMAL, "cxx", PLUG_LINE, true)?;
            api.put_key_mapping_if_missing(MappingModes::NORMAL, "cxc", PLUG_CLEAR, true)?;
        }
        Ok(())
    }

    fn dispose(&self) {
        self.mark.lock().take();
    }
}
