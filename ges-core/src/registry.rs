//! A keyed collection of the machines in a simulation.

use crate::{
    logging::machine_creation_event,
    machine::{Machine, MachineConfig, MachineError, Model},
    sim::SimHandle,
};
use rustc_hash::FxHashMap;
use std::rc::Rc;
use thiserror::Error as ThisError;

/// How many times new identifiers are drawn before giving up on a collision.
const IDENTITY_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum RegistryError {
    #[error("A machine named '{0}' already exists")]
    DuplicateName(String),
    #[error("Could not generate a unique serial number and MAC address for a {0}")]
    IdentityExhausted(&'static str),
    #[error("No machine matches '{0}'")]
    DoesNotExist(String),
    #[error("A machine cannot be paired with itself")]
    SelfPairing,
    #[error("{0}")]
    Machine(#[from] MachineError),
}

/// A machine together with the model that drives it.
pub struct Device<M: ?Sized> {
    pub machine: Rc<Machine>,
    pub model: Rc<M>,
}

impl<M: ?Sized> Clone for Device<M> {
    fn clone(&self) -> Self {
        Self {
            machine: self.machine.clone(),
            model: self.model.clone(),
        }
    }
}

/// Creates, starts and looks up machines.
pub struct Registry {
    sim: SimHandle,
    devices: Vec<Device<dyn Model>>,
    by_name: FxHashMap<String, usize>,
}

impl Registry {
    pub fn new(sim: &SimHandle) -> Self {
        Self {
            sim: sim.clone(),
            devices: Vec::new(),
            by_name: FxHashMap::default(),
        }
    }

    /// Creates a machine driven by `model`, starts its processes unless the
    /// config asks for a dormant machine, and registers it. A machine whose
    /// model fails to start is not registered.
    pub fn spawn<M: Model>(&mut self, model: M, config: MachineConfig) -> Result<Device<M>, RegistryError> {
        let codename = model.codename();
        let machine = self.create(&model, &config)?;
        if self.by_name.contains_key(machine.instance_name()) {
            return Err(RegistryError::DuplicateName(machine.instance_name().to_string()));
        }

        let device = Device {
            machine: Rc::new(machine),
            model: Rc::new(model),
        };
        if !config.dormant {
            device.model.clone().start(device.machine.clone())?;
            tracing::info!(codename, name = device.machine.instance_name(), "machine started");
        }

        machine_creation_event(&device.machine);
        self.by_name
            .insert(device.machine.instance_name().to_string(), self.devices.len());
        self.devices.push(Device {
            machine: device.machine.clone(),
            model: device.model.clone() as Rc<dyn Model>,
        });
        Ok(device)
    }

    fn create(&self, model: &dyn Model, config: &MachineConfig) -> Result<Machine, RegistryError> {
        for _ in 0..IDENTITY_ATTEMPTS {
            let machine = Machine::new(&self.sim, model, config)?;
            let taken = self.devices.iter().any(|device| {
                device.machine.serial_number() == machine.serial_number()
                    || device.machine.mac_address() == machine.mac_address()
            });
            if !taken {
                return Ok(machine);
            }
            tracing::debug!(codename = model.codename(), "identifier collision, drawing again");
        }
        Err(RegistryError::IdentityExhausted(model.codename()))
    }

    /// Looks a machine up by instance name.
    pub fn get(&self, instance_name: &str) -> Option<&Device<dyn Model>> {
        self.by_name
            .get(instance_name)
            .and_then(|&index| self.devices.get(index))
    }

    /// Looks a machine up by instance name, serial number or MAC address.
    pub fn find(&self, id: &str) -> Option<&Device<dyn Model>> {
        self.get(id).or_else(|| {
            self.devices.iter().find(|device| {
                device.machine.serial_number() == id || device.machine.mac_address() == id
            })
        })
    }

    fn require(&self, id: &str) -> Result<&Device<dyn Model>, RegistryError> {
        self.find(id)
            .ok_or_else(|| RegistryError::DoesNotExist(id.to_string()))
    }

    /// Every machine, or only those with the given codename, in creation
    /// order.
    pub fn list(&self, codename: Option<&str>) -> Vec<Rc<Machine>> {
        self.devices
            .iter()
            .filter(|device| codename.map_or(true, |codename| device.machine.codename() == codename))
            .map(|device| device.machine.clone())
            .collect()
    }

    /// Tells `parent` to act on what `child` reports. Both may be given by
    /// instance name, serial number or MAC address.
    pub fn pair(&self, parent: &str, child: &str) -> Result<(), RegistryError> {
        let parent = self.require(parent)?;
        let child = self.require(child)?;
        if Rc::ptr_eq(&parent.machine, &child.machine) {
            return Err(RegistryError::SelfPairing);
        }
        parent.model.pair(&parent.machine, &child.machine)?;
        tracing::info!(
            parent = parent.machine.instance_name(),
            child = child.machine.instance_name(),
            "paired"
        );
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device<dyn Model>> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
