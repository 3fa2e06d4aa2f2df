mod breakpoints;
mod evaluation;
mod execution;
mod extensions;
mod instances;
mod isolates;
mod output;
mod queries;
mod wire;
