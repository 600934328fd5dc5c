// Library interface for the AEGIS GeoDNS server
// Allows testing and reuse of the resolution and steering logic

pub mod dns;
