use clap::Parser;
use serde::Serialize;

use nvraw::records::PowerPolicyInfo;
use nvraw::{ClockDelta, ClockKind, ClockTable, CudaProbe, Gpu, NvApi, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Emit one JSON document per GPU instead of text
    #[arg(long)]
    json: bool,

    /// Report only the GPU backing this CUDA device ordinal
    #[arg(short, long)]
    device: Option<i32>,

    /// Return cooler control to the driver's automatic policy
    #[arg(long)]
    restore_fans: bool,
}

#[derive(Serialize)]
struct ClockReport {
    base: ClockTable,
    boost: ClockTable,
    current: ClockTable,
}

#[derive(Serialize)]
struct GpuReport {
    name: String,
    bus: u32,
    slot: u32,
    core_temp: Option<f64>,
    hotspot_temp: Option<f64>,
    vram_temp: Option<f64>,
    fan_percent: Option<i32>,
    clocks: ClockReport,
    overclock: ClockDelta,
    power_policies: Vec<PowerPolicyInfo>,
    power_limit_percent: Option<f64>,
    power_percent: Option<f64>,
}

fn report(api: &NvApi, bus: u32, slot: u32) -> Result<GpuReport> {
    let gpu = Gpu::at_address(api, bus, slot)?;
    Ok(GpuReport {
        name: gpu.name()?.to_string(),
        bus,
        slot,
        core_temp: gpu.core_temp()?,
        hotspot_temp: gpu.hotspot_temp()?,
        vram_temp: gpu.vram_temp()?,
        fan_percent: gpu.fan()?,
        clocks: ClockReport {
            base: gpu.clocks(ClockKind::Base)?,
            boost: gpu.clocks(ClockKind::Boost)?,
            current: gpu.clocks(ClockKind::Current)?,
        },
        overclock: gpu.overclock()?,
        power_policies: api.power_info(gpu.handle())?,
        power_limit_percent: gpu.power_limit()?,
        power_percent: gpu.power()?,
    })
}

fn print_text(r: &GpuReport) {
    fn celsius(v: Option<f64>) -> String {
        v.map_or_else(|| "-".to_string(), |t| format!("{t:.1}°C"))
    }
    println!("{} (bus {} slot {})", r.name, r.bus, r.slot);
    println!(
        "  temps: core={} hotspot={} vram={}",
        celsius(r.core_temp),
        celsius(r.hotspot_temp),
        celsius(r.vram_temp)
    );
    match r.fan_percent {
        Some(duty) => println!("  fan: {duty}%"),
        None => println!("  fan: not controllable"),
    }
    println!("  clocks (base):    {}", r.clocks.base);
    println!("  clocks (boost):   {}", r.clocks.boost);
    println!("  clocks (current): {}", r.clocks.current);
    println!("  overclock: {:?}", r.overclock);
    for policy in &r.power_policies {
        println!(
            "  power policy: pstate={} min={}% default={}% max={}%",
            policy.pstate, policy.min_percent, policy.default_percent, policy.max_percent
        );
    }
    println!(
        "  power limit: {:?}%, current draw: {:?}%",
        r.power_limit_percent, r.power_percent
    );
}

fn run(args: &Args) -> Result<()> {
    let api = NvApi::load()?;
    let cuda = CudaProbe::open()?;

    let mut ordinal = args.device.unwrap_or(0);
    loop {
        // walk CUDA ordinals until the driver rejects one
        let (bus, slot) = match cuda.bus_slot(ordinal) {
            Ok(address) => address,
            Err(err) if args.device.is_none() => {
                log::debug!("stopping enumeration at CUDA device {ordinal}: {err}");
                break;
            }
            Err(err) => return Err(err),
        };
        let r = report(&api, bus, slot)?;
        if args.json {
            let doc = serde_json::to_string_pretty(&r).expect("report serializes");
            println!("{doc}");
        } else {
            print_text(&r);
        }
        if args.restore_fans {
            let restored = api.restore_coolers(api.find_by_address(bus, slot)?)?;
            log::info!("cooler restore on CUDA device {ordinal}: applied={restored}");
        }
        if args.device.is_some() {
            break;
        }
        ordinal += 1;
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
