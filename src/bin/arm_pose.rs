//! Connects to the arm, prints where it currently is and disconnects again.  Handy for recording
//! pick and drop points for the installation file.

use clap::Parser;
use log::warn;

use dobot_palletizer::arm_hal_factory::ArmHalFactory;
use dobot_palletizer::end_effector::EndEffectorKind;

#[derive(Parser, Debug)]
#[clap(name = "arm_pose")]
struct Opts {
    #[clap(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// List serial ports that could have an arm attached and exit.
    #[clap(long)]
    list_ports: bool,

    #[clap(long)]
    fake_hw: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts: Opts = Opts::parse();

    if opts.list_ports {
        for port in serialport::available_ports()? {
            println!("{} ({:?})", port.port_name, port.port_type);
        }
        return Ok(());
    }

    let mut hal = ArmHalFactory::new_maybe_mock(opts.fake_hw).create_hal(&opts.port, EndEffectorKind::default())?;
    let pose = hal.get_pose();
    if let Err(e) = hal.close() {
        warn!("Error while disconnecting: {e}");
    }
    let pose = pose?;

    let p = pose.position;
    println!("Pose: x={:.2} y={:.2} z={:.2} r={:.2}", p.x, p.y, p.z, p.r);
    let [j1, j2, j3, j4] = pose.joints;
    println!("Joints: j1={j1:.2} j2={j2:.2} j3={j3:.2} j4={j4:.2}");
    println!("{}", serde_json::to_string(&pose)?);
    Ok(())
}
