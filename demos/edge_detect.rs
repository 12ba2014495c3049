//! Edge detection demo
//!
//! Runs one filter group (Laplacian, box blur, horizontal and vertical
//! Sobel) over a synthetic image with a bright square and prints each
//! output plane.
//!
//! Usage: cargo run --release --example edge_detect

use conv3_emu::emu::ConvEngine;
use conv3_emu::reference::ConvShape;
use conv3_emu::testing::ConvJob;
use conv3_emu::{EngineConfig, Fixed16};

const HEIGHT: usize = 10;
const WIDTH: usize = 12;

fn image() -> Vec<Fixed16> {
    (0..HEIGHT)
        .flat_map(|y| {
            (0..WIDTH).map(move |x| {
                let inside = (3..7).contains(&y) && (4..9).contains(&x);
                Fixed16::from_f64(if inside { 1.0 } else { 0.125 })
            })
        })
        .collect()
}

fn filters() -> Vec<Fixed16> {
    let laplacian = [0.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 0.0];
    let box_blur = [1.0 / 9.0; 9];
    let sobel_x = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
    let sobel_y = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

    [laplacian, box_blur, sobel_x, sobel_y]
        .iter()
        .flatten()
        .map(|&w| Fixed16::from_f64(w))
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn")
    ).init();

    let shape = ConvShape { height: HEIGHT, width: WIDTH, in_channels: 1, out_channels: 4 };
    let job = ConvJob::new(shape)
        .with_input(image())
        .with_coefficients(filters())
        .with_bias(vec![Fixed16::ZERO; 4]);

    let mut engine = ConvEngine::new(EngineConfig::default())?;
    let result = job.run(&mut engine)?;

    println!("=== Edge detect {}x{} ===", HEIGHT, WIDTH);
    println!(
        "{} cycles, {} MAC steps, {} stall cycles\n",
        result.stats.cycles, result.stats.mac_steps, result.stats.stall_cycles
    );

    let names = ["laplacian", "box blur", "sobel x (ReLU)", "sobel y (ReLU)"];
    let (out_h, out_w) = (shape.out_height(), shape.out_width());
    for (k, name) in names.iter().enumerate() {
        println!("{}:", name);
        for oy in 0..out_h {
            let row: Vec<String> = (0..out_w)
                .map(|ox| format!("{:6.3}", result.output[(oy * out_w + ox) * 4 + k].to_f64()))
                .collect();
            println!("  {}", row.join(" "));
        }
        println!();
    }

    Ok(())
}
