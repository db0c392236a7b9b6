// Note: Game Boy(TM) is a registered trademark of Nintendo CO., LTD. (C) 1989 to 1999 by
// Nintendo CO., LTD.
use clap::Parser;
use gameboy::gpu::{SCREEN_H, SCREEN_W};
use gameboy::joypad::JoypadState;
use gameboy::motherboard::Engine;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Gameboy emulator")]
struct Cli {
    /// Path to a .gb ROM file
    rom: PathBuf,

    /// Scale the video by a factor of 1, 2, 4, or 8
    #[arg(short = 'x', long = "scale-factor", default_value_t = 2)]
    scale: u32,
}

// Maps a 2-bit DMG palette index to the corresponding gray shade.
fn shade(index: u8) -> u32 {
    let gray: u8 = match index & 0x03 {
        0 => 0xff,
        1 => 0xc0,
        2 => 0x60,
        _ => 0x00,
    };
    0xff00_0000 | (u32::from(gray) << 16) | (u32::from(gray) << 8) | u32::from(gray)
}

fn main() {
    rog::reg("gameboy");
    rog::reg("gameboy::cartridge");

    let cli = Cli::parse();

    let rom = std::fs::read(&cli.rom).unwrap_or_else(|e| {
        eprintln!("failed to read {}: {}", cli.rom.display(), e);
        std::process::exit(1);
    });

    let mut engine = Engine::load_rom(rom).unwrap_or_else(|e| {
        eprintln!("failed to load rom: {e}");
        std::process::exit(1);
    });

    let sav_path = cli.rom.with_extension("sav");
    if engine.header().has_battery {
        if let Ok(saved) = std::fs::read(&sav_path) {
            engine.load_ram(&saved);
        }
    }

    let scale = match cli.scale {
        1 => minifb::Scale::X1,
        2 => minifb::Scale::X2,
        4 => minifb::Scale::X4,
        8 => minifb::Scale::X8,
        n => {
            eprintln!("unsupported scale factor {n}, supported: 1, 2, 4, 8");
            std::process::exit(1);
        }
    };
    let mut options = minifb::WindowOptions::default();
    options.resize = true;
    options.scale = scale;

    let title = format!("Gameboy - {}", engine.header().title);
    let mut window = minifb::Window::new(&title, SCREEN_W, SCREEN_H, options).unwrap();
    let mut window_buffer = vec![0u32; SCREEN_W * SCREEN_H];

    while window.is_open() && !window.is_key_down(minifb::Key::Escape) {
        engine.run_frame();

        for (i, &px) in engine.framebuffer().iter().enumerate() {
            window_buffer[i] = shade(px);
        }
        window.update_with_buffer(&window_buffer).unwrap();

        while let Some(byte) = engine.serial_out() {
            rog::debugln!("serial: {:#04x}", byte);
        }

        engine.set_joypad(JoypadState {
            right: window.is_key_down(minifb::Key::Right),
            left: window.is_key_down(minifb::Key::Left),
            up: window.is_key_down(minifb::Key::Up),
            down: window.is_key_down(minifb::Key::Down),
            a: window.is_key_down(minifb::Key::Z),
            b: window.is_key_down(minifb::Key::X),
            select: window.is_key_down(minifb::Key::Space),
            start: window.is_key_down(minifb::Key::Enter),
        });
    }

    if let Some(ram) = engine.save_ram() {
        if let Err(e) = std::fs::write(&sav_path, ram) {
            eprintln!("failed to write {}: {}", sav_path.display(), e);
        }
    }
}
