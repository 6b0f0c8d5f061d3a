//! Object table for one connection
//!
//! Objects live in two dense arenas, one per id range. The table allocates
//! ids in its own range and binds ids the peer chose in the other. Released
//! objects keep their slot as a zombie so late messages addressed to them
//! can be recognised and dropped; an own-range zombie only becomes reusable
//! once the release has been acknowledged.
//!
//! Nothing in the protocol acknowledges server-range ids, so on the server
//! side every released server-created object stays a zombie and the server
//! arena only grows for the lifetime of the connection.

use crate::error::Error;
use crate::protocol::{Interface, ObjectId, Side, SERVER_ID_BASE};

/// A live object
#[derive(Debug)]
pub struct Object<D> {
    pub interface: &'static Interface,
    pub version: u32,
    pub data: D,
}

#[derive(Debug)]
enum Slot<D> {
    Live(Object<D>),
    Zombie {
        interface: &'static Interface,
        version: u32,
    },
    Free,
}

/// Tracks every object of a connection
#[derive(Debug)]
pub struct ObjectTable<D> {
    side: Side,
    client_objects: Vec<Slot<D>>,
    server_objects: Vec<Slot<D>>,

    /// Acknowledged ids of our own range, reused most recent first
    free_list: Vec<ObjectId>,

    /// Number of ids our range may hold
    limit: usize,
}

impl<D> ObjectTable<D> {
    /// Create a table for the given end of a connection
    pub fn new(side: Side) -> Self {
        let limit = match side {
            Side::Client => (SERVER_ID_BASE - 1) as usize,
            Side::Server => (u32::MAX - SERVER_ID_BASE) as usize + 1,
        };
        ObjectTable {
            side,
            client_objects: Vec::new(),
            server_objects: Vec::new(),
            free_list: Vec::new(),
            limit,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_limit(side: Side, limit: usize) -> Self {
        let mut table = Self::new(side);
        table.limit = limit;
        table
    }

    pub fn side(&self) -> Side {
        self.side
    }

    fn base(side: Side) -> u32 {
        match side {
            Side::Client => 1,
            Side::Server => SERVER_ID_BASE,
        }
    }

    fn arena(&self, side: Side) -> &Vec<Slot<D>> {
        match side {
            Side::Client => &self.client_objects,
            Side::Server => &self.server_objects,
        }
    }

    fn arena_mut(&mut self, side: Side) -> &mut Vec<Slot<D>> {
        match side {
            Side::Client => &mut self.client_objects,
            Side::Server => &mut self.server_objects,
        }
    }

    fn slot(&self, id: ObjectId) -> Option<&Slot<D>> {
        if id.is_null() {
            return None;
        }
        let side = id.allocator();
        let index = (id.0 - Self::base(side)) as usize;
        self.arena(side).get(index)
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Slot<D>> {
        if id.is_null() {
            return None;
        }
        let side = id.allocator();
        let index = (id.0 - Self::base(side)) as usize;
        self.arena_mut(side).get_mut(index)
    }

    /// Create an object at a fresh id of our own range
    pub fn allocate(
        &mut self,
        interface: &'static Interface,
        version: u32,
        data: D,
    ) -> Result<ObjectId, Error> {
        let object = Slot::Live(Object {
            interface,
            version,
            data,
        });

        if let Some(id) = self.free_list.pop() {
            if let Some(slot) = self.slot_mut(id) {
                *slot = object;
                return Ok(id);
            }
        }

        let side = self.side;
        let len = self.arena(side).len();
        if len >= self.limit {
            return Err(Error::IdSpaceExhausted);
        }
        self.arena_mut(side).push(object);
        Ok(ObjectId(Self::base(side) + len as u32))
    }

    /// Register an object at an id chosen by the peer (or the display)
    pub fn bind(
        &mut self,
        id: ObjectId,
        interface: &'static Interface,
        version: u32,
        data: D,
    ) -> Result<(), Error> {
        if id.is_null() {
            return Err(Error::InvalidId);
        }
        let side = id.allocator();
        let own = side == self.side;
        let index = (id.0 - Self::base(side)) as usize;
        let object = Slot::Live(Object {
            interface,
            version,
            data,
        });

        let len = self.arena(side).len();
        if index > len {
            return Err(Error::InvalidId);
        }
        if index == len {
            self.arena_mut(side).push(object);
            return Ok(());
        }
        match &self.arena(side)[index] {
            Slot::Live(_) => return Err(Error::IdCollision),
            // still waiting for the peer to stop using it
            Slot::Zombie { .. } if own => return Err(Error::IdCollision),
            _ => {}
        }
        self.arena_mut(side)[index] = object;
        if own {
            self.free_list.retain(|free| *free != id);
        }
        Ok(())
    }

    /// Look up a live object
    pub fn lookup(&self, id: ObjectId) -> Result<&Object<D>, Error> {
        match self.slot(id) {
            Some(Slot::Live(object)) => Ok(object),
            _ => Err(Error::UnknownObject(id)),
        }
    }

    pub fn lookup_mut(&mut self, id: ObjectId) -> Result<&mut Object<D>, Error> {
        match self.slot_mut(id) {
            Some(Slot::Live(object)) => Ok(object),
            _ => Err(Error::UnknownObject(id)),
        }
    }

    /// Interface and version of a released object that has not been
    /// acknowledged yet
    pub fn zombie(&self, id: ObjectId) -> Option<(&'static Interface, u32)> {
        match self.slot(id) {
            Some(Slot::Zombie { interface, version }) => Some((*interface, *version)),
            _ => None,
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        matches!(self.slot(id), Some(Slot::Live(_)))
    }

    /// Mark an object destroyed, returning it
    pub fn release(&mut self, id: ObjectId) -> Result<Object<D>, Error> {
        let slot = self.slot_mut(id).ok_or(Error::UnknownObject(id))?;
        let zombie = match slot {
            Slot::Live(object) => Slot::Zombie {
                interface: object.interface,
                version: object.version,
            },
            _ => return Err(Error::UnknownObject(id)),
        };
        match std::mem::replace(slot, zombie) {
            Slot::Live(object) => Ok(object),
            _ => Err(Error::UnknownObject(id)),
        }
    }

    /// The peer no longer references `id`; make it reusable.
    ///
    /// Only own-range zombies are affected. Returns whether anything changed.
    pub fn acknowledge(&mut self, id: ObjectId) -> bool {
        if id.allocator() != self.side {
            return false;
        }
        match self.slot_mut(id) {
            Some(slot) if matches!(slot, Slot::Zombie { .. }) => *slot = Slot::Free,
            _ => return false,
        }
        self.free_list.push(id);
        true
    }

    pub fn data(&self, id: ObjectId) -> Result<&D, Error> {
        self.lookup(id).map(|object| &object.data)
    }

    /// Replace the data of a live object, returning the previous value
    pub fn set_data(&mut self, id: ObjectId, data: D) -> Result<D, Error> {
        let object = self.lookup_mut(id)?;
        Ok(std::mem::replace(&mut object.data, data))
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.ids().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every live object, client range first
    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let client = self.client_objects.iter().enumerate().filter_map(|(i, slot)| {
            matches!(slot, Slot::Live(_)).then(|| ObjectId(1 + i as u32))
        });
        let server = self.server_objects.iter().enumerate().filter_map(|(i, slot)| {
            matches!(slot, Slot::Live(_)).then(|| ObjectId(SERVER_ID_BASE + i as u32))
        });
        client.chain(server)
    }

    /// Drop every object, returning the ones that were live
    pub fn clear(&mut self) -> Vec<(ObjectId, Object<D>)> {
        let mut live = Vec::new();
        for (side, base) in [(Side::Client, 1), (Side::Server, SERVER_ID_BASE)] {
            for (i, slot) in self.arena_mut(side).drain(..).enumerate() {
                if let Slot::Live(object) = slot {
                    live.push((ObjectId(base + i as u32), object));
                }
            }
        }
        self.free_list.clear();
        live
    }
}
