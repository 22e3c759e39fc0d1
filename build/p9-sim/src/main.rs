// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs the istep plan against a register-level model of a POWER9 machine.
//!
//! The model is only as clever as the isteps need it to be: write-AND and
//! write-OR aliases update their base register, the SBE answers PSU
//! messages at once, the XBus link trains, memory PLLs flush and lock, and
//! the TOD starts when told to. Faults can be injected to see how the plan fails.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;

use drv_p9_istep::{
    check_scom_alive, run_istep, run_ramstage, run_romstage, BootConfig,
    BootCtx, FatalBootError, IstepId, RAMSTAGE_ISTEPS, ROMSTAGE_ISTEPS,
};
use drv_p9_sbe::psu::{
    PSU_HOST_DOORBELL_REG, PSU_HOST_DOORBELL_REG_WAND,
    PSU_HOST_DOORBELL_REG_WOR, PSU_SBE_DOORBELL_REG,
    PSU_SBE_DOORBELL_REG_WAND, PSU_SBE_DOORBELL_REG_WOR,
};
use drv_p9_scom_api::{
    chiplet_addr, chiplet_of, Chip, ChipletId, Scom, ScomError, CHIP_ID_REG,
    MAX_CHIPS,
};
use p9_timebase::{Clock, FakeClock};
use ppc_bits::ppc_bit;

/// Chip id of a DD2.2 Nimbus.
const NIMBUS_DD22_CHIP_ID: u64 = 0x220D_1049_0000_0000;

const NET_CTRL0: u64 = 0x000F_0040;
const NET_CTRL1: u64 = 0x000F_0044;
const CPLT_STAT0: u64 = 0x0000_0100;
const CPLT_STAT0_OPCG_DONE: u64 = ppc_bit(8);
const PLL_LOCK_REG: u64 = 0x000F_0019;
const NX_RNG_CFG: u64 = 0x0201_10E0;
const RNG_CFG_COND_STARTUP_TEST_FAIL: u64 = ppc_bit(44);
const XBUS_DL_FIR: u64 = 0x0601_1C00;
const DL_FIR_LINKS_TRAINED: u64 = ppc_bit(0) | ppc_bit(1);
const TOD_START_TOD: u64 = 0x0004_0022;
const TOD_FSM: u64 = 0x0004_0024;
const TOD_FSM_IS_RUNNING: u64 = ppc_bit(4);

/// Chiplets that are switched on in the model.
const ENABLED_CHIPLETS: [ChipletId; 6] = [
    ChipletId::XB,
    ChipletId::MC01,
    ChipletId::MC23,
    ChipletId::PCI0,
    ChipletId::PCI1,
    ChipletId::PCI2,
];

#[derive(Debug, Parser)]
#[clap(
    max_term_width = 80,
    about = "run the POWER9 istep plan against a simulated machine"
)]
struct Args {
    /// Machine description and faults, in TOML.
    #[clap(long)]
    config: Option<PathBuf>,
    /// Present processors as a bit mask; overrides the config file.
    #[clap(long, parse(try_from_str = parse_mask))]
    chips: Option<u8>,
    /// DDR4 speed grade in MT/s; overrides the config file.
    #[clap(long)]
    speed: Option<u32>,
    /// Memory PLL boundary ring flushes never finish.
    #[clap(long)]
    stuck_opcg: bool,
    /// The SBE never answers PSU messages.
    #[clap(long)]
    stuck_sbe: bool,
    /// The SBE doorbell is already rung when the first message is sent.
    #[clap(long)]
    busy_sbe: bool,
    /// The RNG conditioner reports a failed startup test.
    #[clap(long)]
    rng_fail: bool,
    /// The XBus data link between the chips never trains.
    #[clap(long)]
    stuck_xbus: bool,
    /// Continue with the ramstage isteps.
    #[clap(long)]
    ramstage: bool,
    /// Print every istep as it runs.
    #[clap(long)]
    trace: bool,
}

fn parse_mask(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct Faults {
    stuck_opcg: bool,
    stuck_sbe: bool,
    busy_sbe: bool,
    rng_fail: bool,
    stuck_xbus: bool,
}

/// Contents of a `--config` file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SimFile {
    machine: BootConfig,
    faults: Faults,
}

/// Register file of one processor.
#[derive(Debug, Default)]
struct SimChip {
    regs: BTreeMap<u64, u64>,
}

impl SimChip {
    fn get(&self, addr: u64) -> u64 {
        self.regs.get(&addr).copied().unwrap_or(0)
    }

    fn set(&mut self, addr: u64, value: u64) {
        self.regs.insert(addr, value);
    }
}

#[derive(Debug)]
struct SimMachine {
    chips: Vec<SimChip>,
    faults: Faults,
    on_xscom: bool,
    accesses: u64,
    sbe_accesses: u64,
}

impl SimMachine {
    fn new(config: &BootConfig, faults: Faults) -> Self {
        let mut chips: Vec<SimChip> =
            (0..MAX_CHIPS).map(|_| SimChip::default()).collect();
        for chip in config.chip_mask().iter() {
            let sim = &mut chips[usize::from(chip.0)];
            sim.set(CHIP_ID_REG, NIMBUS_DD22_CHIP_ID);
            for chiplet in ENABLED_CHIPLETS {
                sim.set(chiplet_addr(NET_CTRL0, chiplet), ppc_bit(0));
            }
            if faults.rng_fail {
                sim.set(NX_RNG_CFG, RNG_CFG_COND_STARTUP_TEST_FAIL);
            }
            if faults.busy_sbe {
                sim.set(PSU_SBE_DOORBELL_REG, ppc_bit(0));
            }
        }
        Self {
            chips,
            faults,
            on_xscom: false,
            accesses: 0,
            sbe_accesses: 0,
        }
    }

    fn chip(&mut self, chip: Chip) -> Result<&mut SimChip, ScomError> {
        self.chips
            .get_mut(usize::from(chip.0))
            .ok_or(ScomError::FsiReadInvalid { chip: chip.0 })
    }

    fn count(&mut self, chip: Chip) {
        self.accesses += 1;
        if !chip.is_primary() && !self.on_xscom {
            self.sbe_accesses += 1;
        }
    }

    /// The SBE picks up a message as soon as its doorbell rings.
    fn run_sbe(&mut self, chip: Chip) -> Result<(), ScomError> {
        if self.faults.stuck_sbe || self.faults.busy_sbe {
            return Ok(());
        }
        let sim = self.chip(chip)?;
        if sim.get(PSU_SBE_DOORBELL_REG) & ppc_bit(0) != 0 {
            sim.set(PSU_SBE_DOORBELL_REG, 0);
            let host = sim.get(PSU_HOST_DOORBELL_REG);
            sim.set(PSU_HOST_DOORBELL_REG, host | ppc_bit(0));
        }
        Ok(())
    }
}

/// Splits a write-AND or write-OR alias into its base register.
enum Alias {
    And(u64),
    Or(u64),
    Plain,
}

fn alias_of(addr: u64) -> Alias {
    let chiplet = chiplet_of(addr);
    let local = chiplet_addr(addr, ChipletId::PIB);
    let base = |a| chiplet_addr(a, chiplet);
    match local {
        0x000F_0041 => Alias::And(base(NET_CTRL0)),
        0x000F_0042 => Alias::Or(base(NET_CTRL0)),
        0x000F_0045 => Alias::And(base(NET_CTRL1)),
        0x000F_0046 => Alias::Or(base(NET_CTRL1)),
        PSU_SBE_DOORBELL_REG_WAND => Alias::And(PSU_SBE_DOORBELL_REG),
        PSU_SBE_DOORBELL_REG_WOR => Alias::Or(PSU_SBE_DOORBELL_REG),
        PSU_HOST_DOORBELL_REG_WAND => Alias::And(PSU_HOST_DOORBELL_REG),
        PSU_HOST_DOORBELL_REG_WOR => Alias::Or(PSU_HOST_DOORBELL_REG),
        _ => Alias::Plain,
    }
}

impl Scom for SimMachine {
    fn read(&mut self, chip: Chip, addr: u64) -> Result<u64, ScomError> {
        self.count(chip);
        let faults = self.faults;
        let sim = self.chip(chip)?;
        let mut value = sim.get(addr);

        let chiplet = chiplet_of(addr);
        let local = chiplet_addr(addr, ChipletId::PIB);
        if local == CPLT_STAT0
            && (chiplet == ChipletId::MC01 || chiplet == ChipletId::MC23)
            && !faults.stuck_opcg
        {
            value |= CPLT_STAT0_OPCG_DONE;
        }
        if addr == XBUS_DL_FIR && !faults.stuck_xbus {
            value |= DL_FIR_LINKS_TRAINED;
        }
        if local == PLL_LOCK_REG
            && (chiplet == ChipletId::MC01 || chiplet == ChipletId::MC23)
        {
            value |= ppc_bit(0);
        }
        Ok(value)
    }

    fn write(
        &mut self,
        chip: Chip,
        addr: u64,
        data: u64,
    ) -> Result<(), ScomError> {
        self.count(chip);
        let sim = self.chip(chip)?;
        match alias_of(addr) {
            Alias::And(base) => {
                let v = sim.get(base);
                sim.set(base, v & data);
            }
            Alias::Or(base) => {
                let v = sim.get(base);
                sim.set(base, v | data);
            }
            Alias::Plain => sim.set(addr, data),
        }

        if addr == TOD_START_TOD && data & ppc_bit(0) != 0 {
            let fsm = sim.get(TOD_FSM);
            sim.set(TOD_FSM, fsm | TOD_FSM_IS_RUNNING);
        }
        if addr == PSU_SBE_DOORBELL_REG_WOR {
            self.run_sbe(chip)?;
        }
        Ok(())
    }

    fn switch_secondary_to_xscom(&mut self) {
        self.on_xscom = true;
    }
}

fn load_config(path: &Path) -> Result<SimFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Runs `plan` one istep at a time, printing each.
fn run_traced<S: Scom, C: Clock>(
    ctx: &mut BootCtx<'_, S, C>,
    plan: &[IstepId],
) -> Result<(), FatalBootError> {
    for &istep in plan {
        println!("istep {istep} at {} us", ctx.clock.now_us());
        run_istep(ctx, istep)
            .map_err(|error| FatalBootError { istep, error })?;
    }
    Ok(())
}

fn boot(
    ctx: &mut BootCtx<'_, SimMachine, FakeClock>,
    args: &Args,
) -> Result<(), FatalBootError> {
    if args.trace {
        run_traced(ctx, ROMSTAGE_ISTEPS)?;
        check_scom_alive(ctx).map_err(|error| FatalBootError {
            istep: ROMSTAGE_ISTEPS[ROMSTAGE_ISTEPS.len() - 1],
            error,
        })?;
        if args.ramstage {
            run_traced(ctx, RAMSTAGE_ISTEPS)?;
        }
        return Ok(());
    }

    run_romstage(ctx)?;
    if args.ramstage {
        run_ramstage(ctx)?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => load_config(path)?,
        None => SimFile::default(),
    };
    let mut config = file.machine;
    if let Some(chips) = args.chips {
        config.chips = chips;
    }
    if let Some(speed) = args.speed {
        config.mem_speed_mts = speed;
    }

    let faults = Faults {
        stuck_opcg: file.faults.stuck_opcg || args.stuck_opcg,
        stuck_sbe: file.faults.stuck_sbe || args.stuck_sbe,
        busy_sbe: file.faults.busy_sbe || args.busy_sbe,
        rng_fail: file.faults.rng_fail || args.rng_fail,
        stuck_xbus: file.faults.stuck_xbus || args.stuck_xbus,
    };
    let mut machine = SimMachine::new(&config, faults);
    let clock = FakeClock::new();

    let mut ctx = BootCtx::new(&mut machine, &clock, &config);
    let result = boot(&mut ctx, &args);
    let last = ctx.last_istep();

    if let Err(e) = result {
        bail!("{e}");
    }

    println!(
        "boot plan completed: {} SCOM accesses ({} over SBE), {} us",
        machine.accesses,
        machine.sbe_accesses,
        clock.now_us()
    );
    if let Some(last) = last {
        println!("last istep: {last}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drv_p9_sbe::psu::PSU_HOST_SBE_MBOX0_REG;

    fn machine(chips: u8, faults: Faults) -> (SimMachine, BootConfig) {
        let config = BootConfig {
            chips,
            ..BootConfig::default()
        };
        (SimMachine::new(&config, faults), config)
    }

    #[test]
    fn write_aliases_update_base() {
        let (mut m, _) = machine(0x01, Faults::default());
        let net_ctrl0 = chiplet_addr(NET_CTRL0, ChipletId::MC01);
        m.write(Chip(0), chiplet_addr(0x000F_0042, ChipletId::MC01), ppc_bit(4))
            .unwrap();
        assert_eq!(m.read(Chip(0), net_ctrl0).unwrap(), ppc_bit(0) | ppc_bit(4));
        m.write(Chip(0), chiplet_addr(0x000F_0041, ChipletId::MC01), !ppc_bit(0))
            .unwrap();
        assert_eq!(m.read(Chip(0), net_ctrl0).unwrap(), ppc_bit(4));
    }

    #[test]
    fn full_boot() {
        let (mut m, config) = machine(0x03, Faults::default());
        let clock = FakeClock::new();
        let mut ctx = BootCtx::new(&mut m, &clock, &config);
        run_romstage(&mut ctx).unwrap();
        run_ramstage(&mut ctx).unwrap();
        assert!(m.on_xscom);
        assert!(m.sbe_accesses > 0);
        assert_eq!(m.chips[0].get(TOD_FSM), TOD_FSM_IS_RUNNING);
    }

    #[test]
    fn stuck_sbe_times_out_in_13_3() {
        let faults = Faults {
            stuck_sbe: true,
            ..Faults::default()
        };
        let (mut m, config) = machine(0x01, faults);
        let clock = FakeClock::new();
        let mut ctx = BootCtx::new(&mut m, &clock, &config);
        let e = run_romstage(&mut ctx).unwrap_err();
        assert_eq!(e.istep, IstepId::new(13, 3));
        assert_eq!(e.error, drv_p9_istep::IstepError::SbeResponseTimeout);
    }

    #[test]
    fn stuck_xbus_fails_9_7() {
        let faults = Faults {
            stuck_xbus: true,
            ..Faults::default()
        };
        let (mut m, config) = machine(0x03, faults);
        let clock = FakeClock::new();
        let mut ctx = BootCtx::new(&mut m, &clock, &config);
        let e = run_romstage(&mut ctx).unwrap_err();
        assert_eq!(
            e.to_string(),
            "istep 9.7: XBus link DL training failed on chip 0"
        );
        assert!(!m.on_xscom);
    }

    #[test]
    fn stuck_opcg_times_out_in_13_2() {
        let faults = Faults {
            stuck_opcg: true,
            ..Faults::default()
        };
        let (mut m, config) = machine(0x01, faults);
        let clock = FakeClock::new();
        let mut ctx = BootCtx::new(&mut m, &clock, &config);
        let e = run_romstage(&mut ctx).unwrap_err();
        assert_eq!(
            e.to_string(),
            "istep 13.2: timed out while waiting for PLL boundary ring \
             flush (chip 0, MCS0)"
        );
    }

    #[test]
    fn busy_sbe_fails_13_3_at_once() {
        let faults = Faults {
            busy_sbe: true,
            ..Faults::default()
        };
        let (mut m, config) = machine(0x01, faults);
        let clock = FakeClock::new();
        let mut ctx = BootCtx::new(&mut m, &clock, &config);
        let e = run_romstage(&mut ctx).unwrap_err();
        assert_eq!(e.to_string(), "istep 13.3: MBOX to SBE busy");
        assert_eq!(m.chips[0].get(PSU_HOST_SBE_MBOX0_REG), 0);
    }

    #[test]
    fn config_file_format() {
        let file: SimFile = toml::from_str(
            "[machine]\n\
             chips = 3\n\
             mem_speed_mts = 2666\n\
             mcs_functional = [[true, false], [true, true]]\n\
             [faults]\n\
             rng_fail = true\n",
        )
        .unwrap();
        assert_eq!(file.machine.chips, 3);
        assert!(!file.machine.mcs_functional(Chip(0), 1));
        assert!(file.faults.rng_fail);
        assert!(!file.faults.stuck_sbe);

        let file: SimFile = toml::from_str("").unwrap();
        assert_eq!(file.machine, BootConfig::default());
        assert!(toml::from_str::<SimFile>("[machine]\ncores = 4").is_err());
    }

    #[test]
    fn masks_in_hex_or_decimal() {
        assert_eq!(parse_mask("0x03").unwrap(), 3);
        assert_eq!(parse_mask("1").unwrap(), 1);
        assert!(parse_mask("0x100").is_err());
    }
}
