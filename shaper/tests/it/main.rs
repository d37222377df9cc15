mod delay;
mod rate;
mod stack;
