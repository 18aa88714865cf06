pub mod cancel;
pub mod check;
pub mod checkpoints;
pub mod run;
pub mod status;
