pub mod acf;
pub mod bed;
pub mod coverage;
pub mod error;
pub mod io;
pub mod matcher;
pub mod normal;
pub mod pipeline;
pub mod sidak;
pub mod simulate;
pub mod stouffer;
