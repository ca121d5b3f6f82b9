use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn root_arg() -> Arg {
    Arg::new("root")
        .short('r')
        .long("root")
        .value_name("DIR")
        .help("Alternate root directory")
}

fn cli() -> Command {
    Command::new("tarpkg")
        .about("Lightweight tar-based package manager")
        .subcommand(
            Command::new("add")
                .about("Install or upgrade a software package")
                .arg(Arg::new("package").required(true).value_name("FILE"))
                .arg(root_arg())
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Alternate rule configuration file"),
                )
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Force install, overwrite conflicting files"),
                )
                .arg(
                    Arg::new("upgrade")
                        .short('u')
                        .long("upgrade")
                        .action(ArgAction::SetTrue)
                        .help("Upgrade package with the same name"),
                ),
        )
        .subcommand(
            Command::new("rm")
                .about("Remove an installed software package")
                .arg(Arg::new("package").required(true).value_name("NAME"))
                .arg(root_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Check the integrity of installed packages")
                .arg(Arg::new("packages").value_name("NAME").num_args(0..))
                .arg(root_arg())
                .arg(
                    Arg::new("links")
                        .short('l')
                        .long("links")
                        .action(ArgAction::SetTrue)
                        .help("Check symlinks"),
                )
                .arg(
                    Arg::new("disappeared")
                        .short('d')
                        .long("disappeared")
                        .action(ArgAction::SetTrue)
                        .help("Check for disappeared files"),
                )
                .arg(
                    Arg::new("audit")
                        .short('a')
                        .long("audit")
                        .action(ArgAction::SetTrue)
                        .help("Run all checks"),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Display software package information")
                .arg(root_arg())
                .arg(
                    Arg::new("installed")
                        .short('i')
                        .long("installed")
                        .action(ArgAction::SetTrue)
                        .help("List installed packages and their versions"),
                )
                .arg(
                    Arg::new("list")
                        .short('l')
                        .long("list")
                        .value_name("PACKAGE|FILE")
                        .help("List files owned by a package or contained in an archive"),
                )
                .arg(
                    Arg::new("owner")
                        .short('o')
                        .long("owner")
                        .value_name("PATTERN")
                        .help("List packages that own files matching a pattern"),
                )
                .arg(
                    Arg::new("footprint")
                        .short('f')
                        .long("footprint")
                        .value_name("FILE")
                        .help("Print a package archive's footprint"),
                ),
        )
}

fn main() -> std::io::Result<()> {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));

    let cmd = cli();
    let mut buffer: Vec<u8> = Vec::new();
    Man::new(cmd.clone()).render(&mut buffer)?;
    fs::write(out_dir.join("tarpkg.1"), &buffer)?;

    for subcommand in cmd.get_subcommands() {
        let name = format!("tarpkg-{}", subcommand.get_name());
        let mut buffer: Vec<u8> = Vec::new();
        Man::new(subcommand.clone().name(name.clone())).render(&mut buffer)?;
        fs::write(out_dir.join(format!("{name}.1")), &buffer)?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
