use std::fmt;
use std::net::SocketAddr;

use crate::error::SessionError;

use super::message::{Message, MessageOptions, MessageType};
use super::protocol::{
    CoreMessage, INVALID_MESSAGE_INDEX, MAX_MESSAGE_TYPES, RESERVED_MESSAGE_INDICES,
};

/// Where a received message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sender {
    pub address: SocketAddr,
    /// Slot of the sender's connection, when the packet was bound to one.
    pub connection_index: Option<u8>,
}

/// User handler. The return value reports whether the message was consumed.
pub type MessageCallback = Box<dyn FnMut(&Message, &Sender) -> bool + Send>;

enum Handler {
    Core(CoreMessage),
    Callback(MessageCallback),
    /// Handed to the owning connection's inbox.
    Deliver,
}

/// How the session should dispatch a message of a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Core(CoreMessage),
    Callback,
    Deliver,
}

struct Entry {
    ty: MessageType,
    handler: Handler,
}

/// Fixed table of message definitions, addressed by wire index.
pub struct MessageRegistry {
    slots: Vec<Option<Entry>>,
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().flatten().map(|entry| &entry.ty))
            .finish()
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageRegistry {
    /// A table holding only the built-in session message types.
    pub fn new() -> Self {
        let mut slots: Vec<Option<Entry>> = (0..MAX_MESSAGE_TYPES).map(|_| None).collect();
        for core in CoreMessage::ALL {
            slots[core.index() as usize] = Some(Entry {
                ty: MessageType {
                    index: core.index(),
                    name: core.name().to_owned(),
                    options: core_options(core),
                },
                handler: Handler::Core(core),
            });
        }
        Self { slots }
    }

    /// Registers a user message type at the lowest free index at or above
    /// [`RESERVED_MESSAGE_INDICES`].
    ///
    /// Connectionless types must supply a callback. Connection-scoped types
    /// without one are delivered to the sending connection's inbox.
    pub fn register(
        &mut self,
        name: &str,
        options: MessageOptions,
        callback: Option<MessageCallback>,
    ) -> Result<u8, SessionError> {
        if self.find(name).is_some() {
            return Err(SessionError::DuplicateMessageType(name.to_owned()));
        }
        let connectionless = !options.requires_connection();
        if connectionless && callback.is_none() {
            return Err(SessionError::MissingCallback(name.to_owned()));
        }

        let index = (RESERVED_MESSAGE_INDICES..INVALID_MESSAGE_INDEX)
            .find(|&i| self.slots[i as usize].is_none())
            .ok_or(SessionError::RegistryFull)?;

        let handler = match callback {
            Some(callback) => Handler::Callback(callback),
            None => Handler::Deliver,
        };
        self.slots[index as usize] = Some(Entry {
            ty: MessageType {
                index,
                name: name.to_owned(),
                options,
            },
            handler,
        });
        log::debug!("Registered message type {:?} at index {}", name, index);
        Ok(index)
    }

    pub fn get(&self, index: u8) -> Option<&MessageType> {
        self.slots[index as usize].as_ref().map(|entry| &entry.ty)
    }

    /// Linear scan by name; the table is small.
    pub fn find(&self, name: &str) -> Option<&MessageType> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| &entry.ty)
            .find(|ty| ty.name == name)
    }

    pub fn core(&self, core: CoreMessage) -> &MessageType {
        match &self.slots[core.index() as usize] {
            Some(entry) => &entry.ty,
            None => unreachable!("core message types are registered at construction"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageType> {
        self.slots.iter().flatten().map(|entry| &entry.ty)
    }

    pub(crate) fn route(&self, index: u8) -> Option<Route> {
        self.slots[index as usize]
            .as_ref()
            .map(|entry| match entry.handler {
                Handler::Core(core) => Route::Core(core),
                Handler::Callback(_) => Route::Callback,
                Handler::Deliver => Route::Deliver,
            })
    }

    /// Runs the user callback for `message`. Returns `None` if its type has
    /// no callback.
    pub(crate) fn invoke(&mut self, message: &Message, sender: &Sender) -> Option<bool> {
        match self.slots[message.type_index() as usize].as_mut() {
            Some(Entry {
                handler: Handler::Callback(callback),
                ..
            }) => Some(callback(message, sender)),
            _ => None,
        }
    }
}

fn core_options(core: CoreMessage) -> MessageOptions {
    match core {
        CoreMessage::Ping | CoreMessage::Pong | CoreMessage::JoinRequest | CoreMessage::JoinDeny => {
            MessageOptions::CONNECTIONLESS
        }
        CoreMessage::Heartbeat => MessageOptions::REQUIRES_CONNECTION,
        CoreMessage::JoinAccept | CoreMessage::JoinFinished | CoreMessage::UpdateConnection => {
            MessageOptions::REQUIRES_CONNECTION | MessageOptions::RELIABLE_IN_ORDER
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sender() -> Sender {
        Sender {
            address: "127.0.0.1:9000".parse().unwrap(),
            connection_index: Some(1),
        }
    }

    #[test]
    fn test_core_types_present() {
        let registry = MessageRegistry::new();
        let accept = registry.find("join_accept").unwrap();
        assert_eq!(accept.index, CoreMessage::JoinAccept.index());
        assert!(accept.options.is_reliable());
        assert_eq!(registry.route(accept.index), Some(Route::Core(CoreMessage::JoinAccept)));
        assert!(!registry.core(CoreMessage::Ping).options.requires_connection());
    }

    #[test]
    fn test_user_types_start_at_reserved_boundary() {
        let mut registry = MessageRegistry::new();
        let first = registry
            .register("chat", MessageOptions::REQUIRES_CONNECTION, None)
            .unwrap();
        let second = registry
            .register("state", MessageOptions::REQUIRES_CONNECTION, None)
            .unwrap();
        assert_eq!(first, RESERVED_MESSAGE_INDICES);
        assert_eq!(second, RESERVED_MESSAGE_INDICES + 1);
        assert_eq!(registry.route(first), Some(Route::Deliver));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = MessageRegistry::new();
        let err = registry
            .register("ping", MessageOptions::REQUIRES_CONNECTION, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateMessageType(name) if name == "ping"));
    }

    #[test]
    fn test_connectionless_requires_callback() {
        let mut registry = MessageRegistry::new();
        let err = registry
            .register("discover", MessageOptions::CONNECTIONLESS, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::MissingCallback(_)));
    }

    #[test]
    fn test_registry_full() {
        let mut registry = MessageRegistry::new();
        let free = (INVALID_MESSAGE_INDEX - RESERVED_MESSAGE_INDICES) as usize;
        for i in 0..free {
            registry
                .register(&format!("user{i}"), MessageOptions::REQUIRES_CONNECTION, None)
                .unwrap();
        }
        let err = registry
            .register("overflow", MessageOptions::REQUIRES_CONNECTION, None)
            .unwrap_err();
        assert!(matches!(err, SessionError::RegistryFull));
    }

    #[test]
    fn test_invoke_runs_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let mut registry = MessageRegistry::new();
        let index = registry
            .register(
                "discover",
                MessageOptions::CONNECTIONLESS,
                Some(Box::new(move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                })),
            )
            .unwrap();

        let mut message = Message::new("discover");
        message.set_definition(registry.get(index).unwrap());
        assert_eq!(registry.invoke(&message, &sender()), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut ping = Message::new("ping");
        ping.set_definition(registry.core(CoreMessage::Ping));
        assert_eq!(registry.invoke(&ping, &sender()), None);
    }
}
