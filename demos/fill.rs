//! Fills a WS2812 strip with one colour.
//!
//! Run on the Pi with: `sudo ws2812-fill --leds 60 --color ff8000 --brightness 0.3`

use std::thread;
use std::time::Duration;

use clap::Parser;
use embedded_graphics::pixelcolor::RgbColor;
use log::info;
use ws2812_rpi::config::{Config, PwmPin};
use ws2812_rpi::{Color, NeoPixel, OrEscalate};

#[derive(Parser)]
#[command(name = "ws2812-fill")]
#[command(about = "Fill a WS2812 strip with one colour", long_about = None)]
struct Cli {
    /// Number of LEDs on the strip
    #[arg(long, default_value_t = 60)]
    leds: usize,
    /// Colour as six hex digits, RRGGBB
    #[arg(long, default_value = "ffffff", value_parser = parse_color)]
    color: Color,
    /// Brightness between 0.0 and 1.0
    #[arg(long, default_value_t = 0.2)]
    brightness: f32,
    /// SoC the strip is wired to, which sets the peripheral base
    #[arg(long, default_value = "bcm2835")]
    board: Board,
    /// GPIO pin carrying PWM channel 1
    #[arg(long, default_value = "gpio18")]
    pin: Pin,
    /// DMA channel, 0 to 14
    #[arg(long, default_value_t = 0)]
    dma_channel: u8,
    /// Seconds to keep the colour before clearing the strip
    #[arg(long, default_value_t = 5)]
    hold: u64,
    /// More log output, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Board {
    /// Pi 1 and Zero
    Bcm2835,
    /// Pi 2 and 3
    Bcm2836,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Pin {
    /// Header pin 12, alternate function 5
    Gpio18,
    /// Header pin 32, alternate function 0
    Gpio12,
}

fn parse_color(text: &str) -> Result<Color, String> {
    let text = text.trim_start_matches('#');
    if text.len() != 6 {
        return Err(format!("expected RRGGBB, got {text:?}"));
    }
    let rgb = u32::from_str_radix(text, 16).map_err(|err| err.to_string())?;
    Ok(Color::new((rgb >> 16) as u8, (rgb >> 8) as u8, rgb as u8))
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .default_format()
        .format_module_path(false)
        .filter_level(log::LevelFilter::Warn)
        .filter_module("ws2812_rpi", level)
        .filter_module("ws2812_fill", level)
        .init();

    let config = match cli.board {
        Board::Bcm2835 => Config::bcm2835(),
        Board::Bcm2836 => Config::bcm2836(),
    }
    .with_dma_channel(cli.dma_channel)
    .with_pin(match cli.pin {
        Pin::Gpio18 => PwmPin::Gpio18,
        Pin::Gpio12 => PwmPin::Gpio12,
    });

    let mut strip = NeoPixel::with_config(&config, cli.leds).or_escalate();
    strip.set_brightness(cli.brightness).or_escalate();
    for i in 0..strip.len() {
        strip.set_color(i, cli.color).or_escalate();
    }
    strip.show().or_escalate();
    info!(
        "showing #{:02x}{:02x}{:02x} on {} LEDs for {}s",
        cli.color.r(),
        cli.color.g(),
        cli.color.b(),
        strip.len(),
        cli.hold
    );

    thread::sleep(Duration::from_secs(cli.hold));
    strip.clear();
    strip.show().or_escalate();
}
