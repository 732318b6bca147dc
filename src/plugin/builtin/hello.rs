//! "Hello World" sample module.
//!
//! Landscape, centred title at scale 2, and an update counter along the bottom.
//!
//! ```toml
//! [modules.hello]
//! text = "HELLO WORLD"
//! color = "#FFFFFF"
//! ```

use anyhow::Context;
use async_trait::async_trait;

use crate::display::{text_extent, Canvas, Orientation};
use crate::plugin::{ContentModule, ModuleConfig, ModuleFactory};
use crate::protocol::Rgb565;

const DEFAULT_TEXT: &str = "HELLO WORLD";
const TITLE_SCALE: u8 = 2;
const COUNTER_POS: (u16, u16) = (10, 65);

/// Builds [`HelloWorldModule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloWorldFactory;

impl ModuleFactory for HelloWorldFactory {
    fn entry(&self) -> &'static str {
        "hello"
    }

    fn create(&self, config: &ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>> {
        Ok(Box::new(HelloWorldModule::from_config(config)?))
    }
}

#[derive(Debug, Clone)]
pub struct HelloWorldModule {
    text: String,
    text_color: Rgb565,
    background: Rgb565,
    updates: u64,
}

impl Default for HelloWorldModule {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT.to_string(),
            text_color: Rgb565::WHITE,
            background: Rgb565::BLACK,
            updates: 0,
        }
    }
}

impl HelloWorldModule {
    pub fn from_config(config: &ModuleConfig) -> anyhow::Result<Self> {
        let mut module = Self::default();
        if let Some(text) = config.get_str("text") {
            module.text = text.to_string();
        }
        if let Some(color) = config.get_str("color") {
            module.text_color = color.parse().context("modules.hello.color")?;
        }
        Ok(module)
    }

    pub fn updates(&self) -> u64 {
        self.updates
    }
}

#[async_trait]
impl ContentModule for HelloWorldModule {
    fn name(&self) -> &str {
        "Hello World Sample"
    }

    fn description(&self) -> &str {
        "Display 'HELLO WORLD' in landscape mode (sample plugin)"
    }

    fn update_interval(&self) -> u64 {
        5
    }

    async fn initialize(&mut self, canvas: &mut Canvas<'_>) -> anyhow::Result<()> {
        canvas.set_orientation(Orientation::Landscape)?;
        canvas.clear(self.background).await?;
        self.updates = 0;
        tracing::debug!(text = %self.text, "Hello World initialized");
        Ok(())
    }

    async fn update(&mut self, canvas: &mut Canvas<'_>, first_draw: bool) -> anyhow::Result<()> {
        if first_draw {
            canvas.clear(self.background).await?;
            let (w, h) = text_extent(&self.text, TITLE_SCALE, Orientation::Landscape);
            let x = u32::from(canvas.width()).saturating_sub(w) / 2;
            let y = u32::from(canvas.height()).saturating_sub(h) / 2;
            canvas
                .draw_text(
                    u16::try_from(x)?,
                    u16::try_from(y)?,
                    &self.text,
                    self.text_color,
                    self.background,
                    TITLE_SCALE,
                )
                .await
                .context("drawing title")?;
        }

        self.updates += 1;
        let counter = format!("UPDATES: {}", self.updates);
        canvas
            .draw_text(
                COUNTER_POS.0,
                COUNTER_POS.1,
                &counter,
                Rgb565::GREEN,
                self.background,
                1,
            )
            .await
            .context("drawing counter")?;
        tracing::debug!(count = self.updates, "Hello World updated");
        Ok(())
    }
}
