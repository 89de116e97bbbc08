mod replay;
mod runtime;
mod support;
