//! SCSI subsystem: the controller, the bus and its devices
//!
//! Owns all bus participants and runs the event loop between them: the
//! controller's delay timer and serial delivery of bus line notifications.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::bus::{Address, BusMember};
use crate::config::ControllerConfig;
use crate::debuggable::Debuggable;
use crate::scsi::bus::{ScsiBus, ScsiDevice, ScsiRefId};
use crate::scsi::ncr5390::{ControllerFault, LineEvent, Ncr5390};
use crate::scsi::target::ScsiTarget;
use crate::scsi::targetdev::TargetDevice;
use crate::tickable::{Tickable, Ticks};
use crate::{dbgprop_bool, dbgprop_group, dbgprop_nest, dbgprop_string, dbgprop_udec};

#[derive(Serialize, Deserialize)]
pub struct ScsiSubsystem {
    bus: ScsiBus,
    ctrl: Ncr5390,
    /// Targets by SCSI ID
    targets: [Option<TargetDevice>; 8],
    /// Other devices on the bus
    devices: Vec<Box<dyn ScsiDevice>>,
    max_deliveries: usize,
    cycles: Ticks,

    /// Error that halted the subsystem
    #[serde(skip)]
    halted: Option<anyhow::Error>,
}

impl ScsiSubsystem {
    pub fn new(config: &ControllerConfig) -> Self {
        let mut bus = ScsiBus::new();
        let ctrl = Ncr5390::new(config, &mut bus);
        Self {
            bus,
            ctrl,
            targets: Default::default(),
            devices: vec![],
            max_deliveries: config.max_deliveries,
            cycles: 0,
            halted: None,
        }
    }

    /// Attaches a command-level target at the given SCSI ID
    pub fn attach_target(&mut self, scsi_id: u8, target: Box<dyn ScsiTarget>) -> Result<ScsiRefId> {
        let Some(slot) = self.targets.get_mut(usize::from(scsi_id)) else {
            bail!("Invalid SCSI ID {}", scsi_id);
        };
        if slot.is_some() {
            bail!("SCSI ID {} already in use", scsi_id);
        }
        let dev = TargetDevice::new(&mut self.bus, scsi_id, target);
        let refid = dev.refid();
        *slot = Some(dev);
        log::debug!("Target attached at SCSI ID {}", scsi_id);
        Ok(refid)
    }

    /// Attaches an arbitrary bus device. The device must have been attached
    /// to this subsystem's bus through [`Self::bus_mut`].
    pub fn attach_device(&mut self, device: Box<dyn ScsiDevice>) -> Result<ScsiRefId> {
        let refid = device.refid();
        if refid.index() >= self.bus.devices() {
            bail!("Device #{} is not attached to this bus", refid.index());
        }
        self.devices.push(device);
        Ok(refid)
    }

    pub fn bus(&self) -> &ScsiBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut ScsiBus {
        &mut self.bus
    }

    pub fn controller(&self) -> &Ncr5390 {
        &self.ctrl
    }

    pub fn target(&self, scsi_id: u8) -> Option<&TargetDevice> {
        self.targets.get(usize::from(scsi_id))?.as_ref()
    }

    pub fn target_mut(&mut self, scsi_id: u8) -> Option<&mut TargetDevice> {
        self.targets.get_mut(usize::from(scsi_id))?.as_mut()
    }

    pub fn irq(&self) -> bool {
        self.ctrl.irq()
    }

    pub fn drq(&self) -> bool {
        self.ctrl.drq()
    }

    /// Takes the oldest IRQ/DRQ edge
    pub fn take_event(&mut self) -> Option<LineEvent> {
        self.ctrl.take_event()
    }

    /// Controller fault that halted the subsystem, if any
    pub fn fault(&self) -> Option<&ControllerFault> {
        self.halted.as_ref()?.downcast_ref::<ControllerFault>()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Elapsed controller clock cycles
    pub fn cycles(&self) -> Ticks {
        self.cycles
    }

    /// Hard reset resets the chip, soft reset resets the SCSI bus
    pub fn reset(&mut self, hard: bool) -> Result<()> {
        if hard {
            self.ctrl.device_reset(&mut self.bus);
        } else {
            self.ctrl.reset_bus(&mut self.bus);
        }
        self.deliver()
    }

    /// DMA read: takes a byte from the controller FIFO
    pub fn dma_read(&mut self) -> Result<u8> {
        let val = self.ctrl.dma_r(&mut self.bus);
        let val = self.halt_on(val.map_err(anyhow::Error::from))?;
        self.deliver()?;
        Ok(val)
    }

    /// DMA write: puts a byte into the controller FIFO
    pub fn dma_write(&mut self, val: u8) -> Result<()> {
        let r = self.ctrl.dma_w(&mut self.bus, val);
        self.halt_on(r.map_err(anyhow::Error::from))?;
        self.deliver()
    }

    /// Latches the first error, the subsystem stays halted afterwards
    fn halt_on<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(e) = &r {
            log::error!("SCSI subsystem halted: {:#}", e);
            if self.halted.is_none() {
                self.halted = Some(match e.downcast_ref::<ControllerFault>() {
                    Some(f) => f.clone().into(),
                    None => anyhow::anyhow!("{:#}", e),
                });
            }
        }
        r
    }

    /// Delivers pending bus notifications until the bus settles
    fn deliver(&mut self) -> Result<()> {
        let r = self.deliver_inner();
        self.halt_on(r)
    }

    fn deliver_inner(&mut self) -> Result<()> {
        let mut count = 0;
        while let Some(id) = self.bus.next_pending() {
            count += 1;
            if count > self.max_deliveries {
                bail!(
                    "SCSI bus notification storm: {} deliveries without settling",
                    self.max_deliveries
                );
            }

            if id == self.ctrl.refid() {
                self.ctrl.bus_changed(&mut self.bus)?;
            } else if let Some(t) = self
                .targets
                .iter_mut()
                .flatten()
                .find(|t| t.refid() == id)
            {
                t.scsi_ctrl_changed(&mut self.bus)?;
            } else if let Some(d) = self.devices.iter_mut().find(|d| d.refid() == id) {
                d.scsi_ctrl_changed(&mut self.bus)?;
            }
        }
        Ok(())
    }
}

impl Tickable for ScsiSubsystem {
    fn tick(&mut self, ticks: Ticks) -> Result<Ticks> {
        if let Some(e) = &self.halted {
            bail!("SCSI subsystem halted: {:#}", e);
        }

        self.deliver()?;

        let mut left = ticks;
        while let Some(remaining) = self.ctrl.timer_remaining() {
            if remaining > left {
                self.ctrl.elapse(left);
                break;
            }
            self.ctrl.elapse(remaining);
            left -= remaining;

            let r = self.ctrl.expire_timer(&mut self.bus);
            self.halt_on(r.map_err(anyhow::Error::from))?;
            self.deliver()?;
        }

        self.cycles += ticks;
        Ok(ticks)
    }
}

impl BusMember<Address> for ScsiSubsystem {
    fn read(&mut self, addr: Address) -> Option<u8> {
        let r = self.ctrl.read(&mut self.bus, (addr & 0x0F) as u8);
        let val = self.halt_on(r.map_err(anyhow::Error::from)).ok()?;
        self.deliver().ok()?;
        val
    }

    fn write(&mut self, addr: Address, val: u8) -> Option<()> {
        let r = self.ctrl.write(&mut self.bus, (addr & 0x0F) as u8, val);
        let res = self.halt_on(r.map_err(anyhow::Error::from)).ok()?;
        self.deliver().ok()?;
        res
    }
}

impl Debuggable for ScsiSubsystem {
    fn get_debug_properties(&self) -> crate::debuggable::DebuggableProperties {
        use crate::debuggable::*;

        let mut result = vec![
            dbgprop_nest!("Controller", self.ctrl),
            dbgprop_string!("Bus control", format!("{:03X}", self.bus.ctrl_r())),
            dbgprop_string!("Bus data", format!("{:02X}", self.bus.data_r())),
            dbgprop_udec!("Cycles", self.cycles),
            dbgprop_bool!("Halted", self.halted.is_some()),
        ];
        for t in self.targets.iter().flatten() {
            result.push(dbgprop_group!(
                format!("Target {}", t.scsi_id()),
                t.get_debug_properties()
            ));
        }
        result
    }
}
