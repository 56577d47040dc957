pub mod framing;
pub mod handoff;
pub mod pcm;
