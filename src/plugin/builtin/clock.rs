//! World clock: up to four cities side by side, portrait text.
//!
//! Cities are given as fixed UTC offsets:
//!
//! ```toml
//! [modules.clock]
//! cities = ["Shanghai=+08:00", "Berlin=+01:00", "Vancouver=-08:00", "Washington=-05:00"]
//! ```
//!
//! The static layout (titles, city names, separators) is drawn on `first_draw`;
//! after that only the time cells are repainted, and only when the minute changes.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};

use crate::display::{Canvas, Orientation};
use crate::plugin::{ContentModule, ModuleConfig, ModuleFactory};
use crate::protocol::Rgb565;

const MAX_CITIES: usize = 4;
const COLUMNS: [u16; MAX_CITIES] = [25, 60, 95, 130];
const TIME_Y: u16 = 28;
const DEFAULT_CITIES: [&str; MAX_CITIES] = [
    "Shanghai=+08:00",
    "Berlin=+01:00",
    "Vancouver=-08:00",
    "Washington=-05:00",
];

type TimeSource = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Builds [`ClockModule`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockFactory;

impl ModuleFactory for ClockFactory {
    fn entry(&self) -> &'static str {
        "clock"
    }

    fn create(&self, config: &ModuleConfig) -> anyhow::Result<Box<dyn ContentModule>> {
        Ok(Box::new(ClockModule::from_config(config)?))
    }
}

/// A city and its UTC offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct City {
    pub name: String,
    pub offset: FixedOffset,
}

impl City {
    /// Parses `Name=+HH:MM`.
    pub fn parse(spec: &str) -> anyhow::Result<Self> {
        let Some((name, offset)) = spec.split_once('=') else {
            bail!("expected NAME=+HH:MM, got '{}'", spec);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("city name is empty in '{}'", spec);
        }
        Ok(Self {
            name: name.to_string(),
            offset: parse_offset(offset.trim())
                .with_context(|| format!("invalid UTC offset in '{}'", spec))?,
        })
    }

    /// First three letters, upper-cased.
    pub fn short_name(&self) -> String {
        self.name.chars().take(3).collect::<String>().to_uppercase()
    }
}

fn parse_offset(s: &str) -> anyhow::Result<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1, &s[1..]),
        Some(b'-') => (-1, &s[1..]),
        _ => bail!("offset must start with + or -"),
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse()?;
    let minutes: i32 = minutes.parse()?;
    if hours > 14 || minutes >= 60 {
        bail!("offset out of range");
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .context("offset out of range")
}

/// Colour of a time cell by local hour.
pub fn time_color(hour: u32) -> Rgb565 {
    match hour {
        6..=11 => Rgb565::YELLOW,
        12..=17 => Rgb565::ORANGE,
        18..=21 => Rgb565::CYAN,
        _ => Rgb565::BLUE,
    }
}

pub struct ClockModule {
    cities: Vec<City>,
    now: TimeSource,
    last_minute: Option<i64>,
}

impl std::fmt::Debug for ClockModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockModule")
            .field("cities", &self.cities)
            .field("last_minute", &self.last_minute)
            .finish()
    }
}

impl ClockModule {
    pub fn new(cities: Vec<City>) -> anyhow::Result<Self> {
        if cities.is_empty() || cities.len() > MAX_CITIES {
            bail!("clock needs 1 to {} cities, got {}", MAX_CITIES, cities.len());
        }
        Ok(Self {
            cities,
            now: Box::new(Utc::now),
            last_minute: None,
        })
    }

    pub fn from_config(config: &ModuleConfig) -> anyhow::Result<Self> {
        let specs: Vec<String> = config
            .get_as("cities")?
            .unwrap_or_else(|| DEFAULT_CITIES.iter().map(|s| s.to_string()).collect());
        let cities = specs
            .iter()
            .map(|s| City::parse(s))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Self::new(cities)
    }

    /// Replaces the wall clock, for tests and demos.
    pub fn with_time_source<F>(mut self, now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.now = Box::new(now);
        self
    }

    pub fn cities(&self) -> &[City] {
        &self.cities
    }

    async fn draw_layout(&self, canvas: &mut Canvas<'_>) -> anyhow::Result<()> {
        canvas.clear(Rgb565::BLACK).await?;
        canvas
            .draw_text(2, 2, "WORLD", Rgb565::GREEN, Rgb565::BLACK, 1)
            .await?;
        canvas
            .draw_text(2, 42, "CLOCK", Rgb565::GREEN, Rgb565::BLACK, 1)
            .await?;

        for (city, x) in self.cities.iter().zip(COLUMNS) {
            canvas
                .draw_text(x, 2, &city.short_name(), Rgb565::DARK_GREEN, Rgb565::BLACK, 1)
                .await?;
        }
        for x in COLUMNS.iter().skip(1).map(|x| x - 5) {
            for y in (5..75).step_by(6) {
                canvas.fill_rect(x, y, 1, 3, Rgb565::DARK_GREEN).await?;
            }
        }
        Ok(())
    }

    async fn draw_times(&self, canvas: &mut Canvas<'_>, now: DateTime<Utc>) -> anyhow::Result<()> {
        for (city, x) in self.cities.iter().zip(COLUMNS) {
            let local = now.with_timezone(&city.offset);
            canvas.fill_rect(x, TIME_Y, 30, 50, Rgb565::BLACK).await?;
            canvas
                .draw_text(
                    x,
                    TIME_Y,
                    &local.format("%H:%M").to_string(),
                    time_color(local.hour()),
                    Rgb565::BLACK,
                    1,
                )
                .await
                .with_context(|| format!("drawing time for {}", city.name))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContentModule for ClockModule {
    fn name(&self) -> &str {
        "World Clock"
    }

    fn description(&self) -> &str {
        "Display world clock for multiple cities (90° rotated)"
    }

    fn update_interval(&self) -> u64 {
        4
    }

    async fn initialize(&mut self, canvas: &mut Canvas<'_>) -> anyhow::Result<()> {
        canvas.set_orientation(Orientation::Portrait)?;
        self.last_minute = None;
        Ok(())
    }

    async fn update(&mut self, canvas: &mut Canvas<'_>, first_draw: bool) -> anyhow::Result<()> {
        let now = (self.now)();
        let minute = now.timestamp().div_euclid(60);
        let minute_changed = self.last_minute != Some(minute);

        if first_draw {
            self.draw_layout(canvas).await?;
        }
        if first_draw || minute_changed {
            self.draw_times(canvas, now).await?;
            self.last_minute = Some(minute);
            tracing::info!(time = %now.format("%H:%M UTC"), "World clock updated");
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> anyhow::Result<()> {
        self.last_minute = None;
        Ok(())
    }
}
