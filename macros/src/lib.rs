//! Proc-macro scaffold. No Dreamcast-specific code generation is needed:
//! register access is handled by hand-written `RegionOps` implementations.
//! Left in place as an empty crate rather than removed from the workspace,
//! in case a future register-bank generator belongs here.
